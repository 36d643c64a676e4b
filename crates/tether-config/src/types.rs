//! Configuration types.
//!
//! Every section uses `#[serde(default)]`, so a file only has to spell out
//! what differs from the defaults. The one required value is
//! `filter.name`, which validation rejects when empty.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Root configuration for one filter registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// The guest filter this registration creates.
    pub filter: FilterSection,
    /// Per-route overlays keyed by route name.
    pub routes: BTreeMap<String, RouteSection>,
    /// Logging level, format and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// FilterSection
// ---------------------------------------------------------------------------

/// The guest filter and its construction policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSection {
    /// Name the guest registered its filter under.
    pub name: String,
    /// Fail the configuration load if the guest cannot build the factory.
    /// When `false` the bridge runs with a dead factory that answers every
    /// request with a local `500`.
    pub crash_on_errors: bool,
    /// Optional generic secret made available to the guest.
    pub secret: Option<String>,
    /// Opaque settings handed to the guest factory.
    pub settings: serde_json::Value,
}

impl Default for FilterSection {
    fn default() -> Self {
        Self {
            name: String::new(),
            crash_on_errors: false,
            secret: None,
            settings: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

impl FilterSection {
    /// Settings encoded as the JSON bytes the guest factory receives.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SettingsError`] if the value cannot be encoded.
    pub fn settings_bytes(&self) -> ConfigResult<Vec<u8>> {
        serde_json::to_vec(&self.settings).map_err(|source| ConfigError::SettingsError {
            field: "filter.settings".to_owned(),
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// RouteSection
// ---------------------------------------------------------------------------

/// Per-route filter overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteSection {
    /// Guest filter name to its per-route settings.
    pub filters: BTreeMap<String, serde_json::Value>,
}

impl RouteSection {
    /// Per-filter settings encoded as JSON bytes, in name order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SettingsError`] if a value cannot be encoded.
    pub fn encoded_filters(&self, route: &str) -> ConfigResult<Vec<(String, Vec<u8>)>> {
        self.filters
            .iter()
            .map(|(name, value)| {
                serde_json::to_vec(value)
                    .map(|bytes| (name.clone(), bytes))
                    .map_err(|source| ConfigError::SettingsError {
                        field: format!("routes.{route}.filters.{name}"),
                        source,
                    })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["tether_bridge=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}
