//! Length-prefixed header blob codec.
//!
//! Prefix scans over a header map hand their matches to the guest as one
//! contiguous buffer:
//!
//! ```text
//! [u32 LE key len][key bytes][u32 LE value len][value bytes] ...
//! ```
//!
//! The guest sizes the buffer. When it is too small the encoder reports the
//! size it needs and leaves the buffer untouched, so the guest can retry.

use serde::{Deserialize, Serialize};

use crate::error::{MarshalError, MarshalResult};

const PREFIX_LEN: usize = 4;

/// One `(key, value)` header entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderPair {
    /// Header name
    pub key: String,
    /// Header value
    pub value: String,
}

impl HeaderPair {
    /// Create a new pair.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

fn field_len(field: &str) -> MarshalResult<usize> {
    let len = field.len();
    u32::try_from(len).map_err(|_| MarshalError::FieldTooLong { len })?;
    len.checked_add(PREFIX_LEN)
        .ok_or(MarshalError::FieldTooLong { len })
}

/// Number of bytes `pairs` occupy once encoded.
///
/// # Errors
///
/// Returns [`MarshalError::FieldTooLong`] if a key or value cannot be
/// described by a `u32` prefix.
pub fn encoded_len(pairs: &[HeaderPair]) -> MarshalResult<usize> {
    pairs.iter().try_fold(0usize, |acc, pair| {
        let key = field_len(&pair.key)?;
        let value = field_len(&pair.value)?;
        acc.checked_add(key)
            .and_then(|n| n.checked_add(value))
            .ok_or(MarshalError::FieldTooLong {
                len: pair.value.len(),
            })
    })
}

fn put_field(out: &mut [u8], offset: usize, field: &str) -> usize {
    // Lengths were checked by `encoded_len`; the casts cannot truncate.
    #[allow(clippy::cast_possible_truncation)]
    let prefix = (field.len() as u32).to_le_bytes();
    let body_start = offset.saturating_add(PREFIX_LEN);
    let body_end = body_start.saturating_add(field.len());
    out[offset..body_start].copy_from_slice(&prefix);
    out[body_start..body_end].copy_from_slice(field.as_bytes());
    body_end
}

/// Encode `pairs` into `out`.
///
/// Always returns the number of bytes the encoding needs. If that is larger
/// than `out.len()`, nothing is written.
///
/// # Errors
///
/// Returns [`MarshalError::FieldTooLong`] if a key or value cannot be
/// described by a `u32` prefix.
pub fn encode_header_blob(pairs: &[HeaderPair], out: &mut [u8]) -> MarshalResult<usize> {
    let needed = encoded_len(pairs)?;
    if needed > out.len() {
        return Ok(needed);
    }
    let mut offset = 0;
    for pair in pairs {
        offset = put_field(out, offset, &pair.key);
        offset = put_field(out, offset, &pair.value);
    }
    Ok(needed)
}

fn take_field(blob: &[u8], offset: usize) -> MarshalResult<(String, usize)> {
    let body_start = offset
        .checked_add(PREFIX_LEN)
        .ok_or(MarshalError::TruncatedLength { offset })?;
    let prefix: [u8; PREFIX_LEN] = blob
        .get(offset..body_start)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(MarshalError::TruncatedLength { offset })?;
    let len = u32::from_le_bytes(prefix) as usize;
    let remaining = blob.len().saturating_sub(body_start);
    let body = body_start
        .checked_add(len)
        .and_then(|end| blob.get(body_start..end))
        .ok_or(MarshalError::FieldOverrun {
            offset: body_start,
            len,
            remaining,
        })?;
    let text = std::str::from_utf8(body)
        .map_err(|_| MarshalError::InvalidUtf8 { offset: body_start })?;
    Ok((text.to_owned(), body_start.saturating_add(len)))
}

/// Decode a blob produced by [`encode_header_blob`].
///
/// # Errors
///
/// Returns a [`MarshalError`] describing the first malformed field. No
/// partial result is returned.
pub fn decode_header_blob(blob: &[u8]) -> MarshalResult<Vec<HeaderPair>> {
    let mut pairs = Vec::new();
    let mut offset = 0;
    while offset < blob.len() {
        let (key, next) = take_field(blob, offset)?;
        let (value, next) = take_field(blob, next)?;
        pairs.push(HeaderPair { key, value });
        offset = next;
    }
    Ok(pairs)
}
