//! Bridge error types.

use thiserror::Error;

/// Errors surfaced by the bridge.
///
/// Lifecycle violations (double binding, stale epochs, unbalanced pins) are
/// programming errors and panic instead of appearing here.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The guest failed to build a filter factory and the configuration asks
    /// for the load to fail.
    #[error("guest could not create filter factory for '{filter}'")]
    FactoryCreation {
        /// Guest filter name
        filter: String,
    },

    /// The bridge configuration could not be turned into guest settings.
    #[error(transparent)]
    Config(#[from] tether_config::ConfigError),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
