//! Tether Core - wire contracts shared by the host bridge and the guest runtime.
//!
//! This crate provides:
//! - Stage-result status codes exchanged across the runtime boundary
//! - Numeric guest log levels
//! - The length-prefixed header blob codec used by prefix scans
//!
//! Nothing in here knows about lifecycles or threads. Both sides of the
//! bridge depend on it so that the numeric contract lives in one place.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod blob;
pub mod error;
pub mod log_level;
pub mod status;

pub use blob::{HeaderPair, decode_header_blob, encode_header_blob, encoded_len};
pub use error::{MarshalError, MarshalResult};
pub use log_level::GuestLogLevel;
pub use status::{DataStatus, HeadersStatus, MetadataStatus, TrailersStatus};
