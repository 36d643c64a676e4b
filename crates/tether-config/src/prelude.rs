//! Prelude module - commonly used types for convenient import.
//!
//! Use `use tether_config::prelude::*;` to import all essential types.

// Errors
pub use crate::{ConfigError, ConfigResult};

// Configuration
pub use crate::{BridgeConfig, FilterSection, LoggingSection, RouteSection};
