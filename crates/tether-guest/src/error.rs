//! Error types for the guest runtime.

use thiserror::Error;

/// Errors raised on the guest side of the bridge.
///
/// None of these cross into the host: the runtime logs them and answers the
/// bridge with tag `0` or a stop status.
#[derive(Debug, Error)]
pub enum GuestError {
    /// No factory-factory is registered under the name.
    #[error("no guest filter registered as '{name}'")]
    UnknownFilter {
        /// Requested filter name.
        name: String,
    },

    /// Settings were not valid JSON for the filter.
    #[error("invalid settings for '{filter}': {source}")]
    InvalidSettings {
        /// Filter name.
        filter: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The filter refused its configuration.
    #[error("filter '{filter}' rejected its configuration: {reason}")]
    Rejected {
        /// Filter name.
        filter: String,
        /// Why.
        reason: String,
    },

    /// Guest code panicked.
    #[error("guest code panicked in {operation}")]
    Panicked {
        /// Which guest entry point.
        operation: &'static str,
    },

    /// The bridge instance behind a handle has been released.
    #[error("filter instance is gone")]
    InstanceGone,

    /// No tokio runtime to spawn guest work on.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Result type for guest operations.
pub type GuestResult<T> = Result<T, GuestError>;
