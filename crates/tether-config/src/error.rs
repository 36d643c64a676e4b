//! Configuration errors.

use thiserror::Error;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path that was being read
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for the expected shape.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path (or `<inline>`) that was being parsed
        path: String,
        /// Underlying TOML error
        #[source]
        source: toml::de::Error,
    },

    /// A value parsed but is not acceptable.
    #[error("invalid config value for {field}: {message}")]
    ValidationError {
        /// Dotted path of the offending field
        field: String,
        /// What is wrong with it
        message: String,
    },

    /// Guest settings could not be serialised for the guest.
    #[error("failed to encode settings for {field}: {source}")]
    SettingsError {
        /// Dotted path of the settings table
        field: String,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
