//! Marshaling errors for data crossing the runtime boundary.

use thiserror::Error;

/// Errors raised while decoding data handed across the runtime boundary.
///
/// Each variant has a stable, non-zero numeric [`code`](Self::code) so the
/// guest side can tell failures apart without parsing messages. Zero is
/// reserved for success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    /// The blob ended in the middle of a length prefix.
    #[error("truncated length prefix at offset {offset}")]
    TruncatedLength {
        /// Byte offset where the prefix started
        offset: usize,
    },

    /// A length prefix points past the end of the blob.
    #[error("field at offset {offset} claims {len} bytes but only {remaining} remain")]
    FieldOverrun {
        /// Byte offset of the field payload
        offset: usize,
        /// Length claimed by the prefix
        len: usize,
        /// Bytes actually left in the blob
        remaining: usize,
    },

    /// A key or value was not valid UTF-8.
    #[error("field at offset {offset} is not valid utf-8")]
    InvalidUtf8 {
        /// Byte offset of the field payload
        offset: usize,
    },

    /// A key or value is too long to be described by a `u32` prefix.
    #[error("field of {len} bytes exceeds the u32 length prefix")]
    FieldTooLong {
        /// Length of the offending field
        len: usize,
    },
}

impl MarshalError {
    /// Stable numeric code for this error. Never zero.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::TruncatedLength { .. } => 1,
            Self::FieldOverrun { .. } => 2,
            Self::InvalidUtf8 { .. } => 3,
            Self::FieldTooLong { .. } => 4,
        }
    }
}

/// Result type for marshaling operations.
pub type MarshalResult<T> = Result<T, MarshalError>;
