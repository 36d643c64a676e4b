//! Prelude module - commonly used types for convenient import.
//!
//! Use `use tether_guest::prelude::*;` when writing a guest filter.

// Errors
pub use crate::{GuestError, GuestResult};

// Authoring
pub use crate::{GuestConfig, GuestFilter, HttpFilterFactory, HttpFilterFactoryFactory, RouteConfig};
pub use crate::{FilterHandle, PinGuard};

// Runtime
pub use crate::{FilterRegistry, GuestRuntime, HandleTable};

// Stage results
pub use tether_core::{DataStatus, GuestLogLevel, HeadersStatus, TrailersStatus};
