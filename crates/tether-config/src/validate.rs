//! Configuration validation.
//!
//! Checks that deserialized [`BridgeConfig`](crate::BridgeConfig) values are
//! within acceptable ranges.

use crate::error::{ConfigError, ConfigResult};
use crate::types::BridgeConfig;

/// Validate a deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &BridgeConfig) -> ConfigResult<()> {
    validate_filter(config)?;
    validate_routes(config)?;
    validate_logging(config)?;
    Ok(())
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn validate_filter(config: &BridgeConfig) -> ConfigResult<()> {
    let f = &config.filter;

    if !is_valid_name(&f.name) {
        return Err(ConfigError::ValidationError {
            field: "filter.name".to_owned(),
            message: format!(
                "filter name '{}' must be non-empty ascii letters, digits, '_', '-' or '.'",
                f.name
            ),
        });
    }

    if f.secret.as_deref().is_some_and(str::is_empty) {
        return Err(ConfigError::ValidationError {
            field: "filter.secret".to_owned(),
            message: "secret name must not be empty when set".to_owned(),
        });
    }

    if !f.settings.is_object() {
        return Err(ConfigError::ValidationError {
            field: "filter.settings".to_owned(),
            message: "settings must be a table".to_owned(),
        });
    }

    Ok(())
}

fn validate_routes(config: &BridgeConfig) -> ConfigResult<()> {
    for (route, section) in &config.routes {
        if route.is_empty() {
            return Err(ConfigError::ValidationError {
                field: "routes".to_owned(),
                message: "route name must not be empty".to_owned(),
            });
        }
        for name in section.filters.keys() {
            if !is_valid_name(name) {
                return Err(ConfigError::ValidationError {
                    field: format!("routes.{route}.filters"),
                    message: format!("invalid filter name '{name}'"),
                });
            }
        }
    }
    Ok(())
}

fn validate_logging(config: &BridgeConfig) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::ValidationError {
            field: "logging.level".to_owned(),
            message: format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        });
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(ConfigError::ValidationError {
            field: "logging.format".to_owned(),
            message: format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        });
    }

    if config.logging.directives.iter().any(|d| d.trim().is_empty()) {
        return Err(ConfigError::ValidationError {
            field: "logging.directives".to_owned(),
            message: "directives must not be blank".to_owned(),
        });
    }

    Ok(())
}
