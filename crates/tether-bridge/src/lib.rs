//! Tether Bridge - filter instance lifecycle across two runtimes.
//!
//! A host filter chain hands each request to a [`FilterInstance`], which
//! forwards protocol stages to handler code living in a second runtime
//! through a [`FilterProxy`]. The guest may call back at any time from its
//! own threads; the bridge makes sure none of those calls reach host-owned
//! callback objects once teardown has begun.
//!
//! The pieces:
//! - [`epoch`]: per-thread generation stamps that catch handles used across
//!   a hot restart or from the wrong thread
//! - [`FilterFactory`] and [`RouteOverlay`]: guest-side configuration
//!   objects owned by the host
//! - [`FilterInstance`]: pin counting, `post`, and the blocking
//!   [`on_destroy`](FilterInstance::on_destroy)
//! - [`SpanRegistry`]: tracing spans the guest can open and finish by id
//! - [`host`]: the collaborator traits the host implements

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod epoch;
pub mod error;
pub mod factory;
pub mod filter;
pub mod host;
pub mod overlay;
pub mod proxy;
pub mod scheduler;
pub mod span;

#[cfg(test)]
mod test_support;

pub use epoch::{Epoch, EpochSlot, SlotKind};
pub use error::{BridgeError, BridgeResult};
pub use factory::{FactorySettings, FactoryTag, FilterFactory, HOST_FILTER_NAME};
pub use filter::{FilterInstance, LifecycleState};
pub use overlay::RouteOverlay;
pub use proxy::{ConfigProxy, FilterProxy};
pub use scheduler::Deliverable;
pub use span::{DECODER_SPAN, ENCODER_SPAN, NoopSpan, SpanRegistry};
