//! Tether Test - Shared test utilities for the Tether filter bridge.
//!
//! This crate provides host doubles and a dispatcher thread that can be used
//! across the Tether crates as a dev-dependency.
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! tether-test.workspace = true
//! ```
//!
//! Then drive a filter instance from its own dispatcher thread:
//!
//! ```rust,ignore
//! use tether_core::HeadersStatus;
//! use tether_test::prelude::*;
//!
//! #[test]
//! fn headers_continue() {
//!     let proxy = MockProxy::new();
//!     let harness =
//!         BridgeHarness::new(test_factory_settings(), proxy.clone(), MockConfigProxy::new())
//!             .unwrap();
//!     let stream = harness.open_stream();
//!     let status = harness.run(move || {
//!         stream.instance.decode_headers(&mut MockHeaderMap::new(), true)
//!     });
//!     assert_eq!(status, HeadersStatus::Continue);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod dispatcher;
pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use dispatcher::*;
pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
