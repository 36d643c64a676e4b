//! Tether Guest - the handler side of the filter bridge, in process.
//!
//! Guest authors register an [`HttpFilterFactoryFactory`] under a filter
//! name. [`GuestRuntime`] implements the bridge's proxy traits: it builds
//! factories, per-route configs and per-request [`GuestFilter`]s, keys them
//! by tag in [`HandleTable`]s, and forwards protocol stages to them. Guest
//! panics are caught at this boundary and turned into "stop" statuses.
//!
//! Background work goes through [`GuestRuntime::spawn_pinned`], which holds
//! a pin on the bridge instance for the lifetime of the task so teardown
//! waits for it.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod error;
pub mod filter;
pub mod handle;
pub mod registry;
pub mod runtime;
pub mod table;

pub use error::{GuestError, GuestResult};
pub use filter::{
    GuestConfig, GuestFilter, HttpFilterFactory, HttpFilterFactoryFactory, RouteConfig,
};
pub use handle::{FilterHandle, PinGuard};
pub use registry::FilterRegistry;
pub use runtime::GuestRuntime;
pub use table::HandleTable;
