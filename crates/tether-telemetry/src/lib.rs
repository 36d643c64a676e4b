//! Tether Telemetry - logging for the Tether filter bridge.
//!
//! This crate provides:
//! - Logging setup with per-target directives and thread labels that tell
//!   dispatcher threads from guest workers
//! - A lifecycle trace preset for following pins, posts and epochs
//! - Conversion from the `[logging]` config section (feature `config`)
//!
//! # Example
//!
//! ```rust,no_run
//! use tether_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), tether_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Json)
//!     .with_lifecycle_trace();
//!
//! setup_logging(&config)?;
//! tracing::info!("bridge starting");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    LogConfig, LogFormat, LogTarget, ThreadLabels, setup_default_logging, setup_logging,
};
