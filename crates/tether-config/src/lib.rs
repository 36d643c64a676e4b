#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Configuration for the Tether filter bridge.
//!
//! A single [`BridgeConfig`] describes one filter registration: the guest
//! filter name, its opaque settings, the construction-failure policy, the
//! per-route overlays and the logging setup.
//!
//! # Usage
//!
//! ```rust,no_run
//! use tether_config::BridgeConfig;
//!
//! let config = BridgeConfig::load_file(std::path::Path::new("tether.toml")).unwrap();
//! println!("guest filter: {}", config.filter.name);
//! ```
//!
//! # Design
//!
//! This crate has **no dependencies on other internal tether crates**. Guest
//! settings stay opaque: they are carried as JSON values and handed to the
//! bridge as bytes via [`FilterSection::settings_bytes`].

/// Configuration error types.
pub mod error;
/// Configuration file loading.
pub mod loader;
/// Commonly used types.
pub mod prelude;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use types::*;

impl BridgeConfig {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed or
    /// validated.
    pub fn load_file(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }

    /// Parse and validate a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the text cannot be parsed or validated.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        loader::load_str(content, "<inline>")
    }
}
