//! Stage-result status codes.
//!
//! Every stage call into the guest returns a plain integer. The ranges are a
//! stable contract with the guest side: `1xx` for headers, `2xx` for
//! trailers and `3xx` for data. Codes outside the table never fail the
//! stage; they collapse onto the most conservative "stop" variant of their
//! kind.

use serde::{Deserialize, Serialize};

/// Result of a headers stage (`decode_headers` / `encode_headers`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadersStatus {
    /// Continue iterating the filter chain.
    Continue,
    /// Stop iterating until the filter resumes the chain.
    StopIteration,
    /// Continue, but treat the headers as the end of the stream.
    ContinueAndEndStream,
    /// Stop all iteration and buffer the body.
    StopAllIterationAndBuffer,
    /// Stop all iteration and apply watermark back-pressure.
    StopAllIterationAndWatermark,
}

impl HeadersStatus {
    /// Decode a guest status code. Unknown codes map to [`Self::StopIteration`].
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            100 => Self::Continue,
            101 => Self::StopIteration,
            102 => Self::ContinueAndEndStream,
            104 => Self::StopAllIterationAndBuffer,
            105 => Self::StopAllIterationAndWatermark,
            _ => Self::StopIteration,
        }
    }

    /// The wire code for this status.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::Continue => 100,
            Self::StopIteration => 101,
            Self::ContinueAndEndStream => 102,
            Self::StopAllIterationAndBuffer => 104,
            Self::StopAllIterationAndWatermark => 105,
        }
    }
}

/// Result of a trailers stage (`decode_trailers`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailersStatus {
    /// Continue iterating the filter chain.
    Continue,
    /// Stop iterating until the filter resumes the chain.
    StopIteration,
}

impl TrailersStatus {
    /// Decode a guest status code. Unknown codes map to [`Self::StopIteration`].
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            200 => Self::Continue,
            _ => Self::StopIteration,
        }
    }

    /// The wire code for this status.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::Continue => 200,
            Self::StopIteration => 201,
        }
    }
}

/// Result of a data stage (`decode_data` / `encode_data`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataStatus {
    /// Continue iterating the filter chain.
    Continue,
    /// Stop iterating and buffer the data.
    StopIterationAndBuffer,
    /// Stop iterating and apply watermark back-pressure.
    StopIterationAndWatermark,
    /// Stop iterating without buffering.
    StopIterationNoBuffer,
}

impl DataStatus {
    /// Decode a guest status code. Unknown codes map to
    /// [`Self::StopIterationNoBuffer`].
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            300 => Self::Continue,
            301 => Self::StopIterationAndBuffer,
            302 => Self::StopIterationAndWatermark,
            _ => Self::StopIterationNoBuffer,
        }
    }

    /// The wire code for this status.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::Continue => 300,
            Self::StopIterationAndBuffer => 301,
            Self::StopIterationAndWatermark => 302,
            Self::StopIterationNoBuffer => 303,
        }
    }
}

/// Result of a metadata stage. Metadata is never forwarded to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataStatus {
    /// Continue iterating the filter chain.
    Continue,
}
