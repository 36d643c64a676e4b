//! Prelude module - commonly used types for convenient import.
//!
//! Use `use tether_core::prelude::*;` to import all essential types.

// Errors
pub use crate::{MarshalError, MarshalResult};

// Stage results
pub use crate::{DataStatus, HeadersStatus, MetadataStatus, TrailersStatus};

// Logging
pub use crate::GuestLogLevel;

// Header blob codec
pub use crate::{HeaderPair, decode_header_blob, encode_header_blob};
