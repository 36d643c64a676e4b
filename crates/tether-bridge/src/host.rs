//! Collaborator interfaces implemented by the host.
//!
//! The bridge never owns host objects. It sees them through these traits,
//! holds them only between binding and teardown, and touches the stream
//! callbacks only from the dispatcher that owns the stream.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tether_core::{HeaderPair, MarshalResult, decode_header_blob, encode_header_blob};

use crate::overlay::RouteOverlay;

/// The single-threaded event loop that owns a connection.
pub trait Dispatcher: Send + Sync {
    /// Queue `callback` to run on the dispatcher thread. May be called from
    /// any thread.
    fn post(&self, callback: Box<dyn FnOnce() + Send>);

    /// Whether the calling thread is this dispatcher's thread.
    fn is_thread_safe(&self) -> bool;

    /// The dispatcher's wall clock.
    fn now(&self) -> DateTime<Utc>;
}

/// Callbacks shared by the decoder and encoder halves of a stream.
pub trait StreamFilterCallbacks: Send + Sync {
    /// The dispatcher running this stream.
    fn dispatcher(&self) -> Arc<dyn Dispatcher>;

    /// The stream's ambient tracing span.
    fn active_span(&self) -> Arc<dyn Span>;

    /// The route selected for this stream, if any.
    fn route(&self) -> Option<Arc<dyn Route>>;
}

/// Request-path callbacks.
pub trait DecoderFilterCallbacks: StreamFilterCallbacks {
    /// Resume a decoder chain stopped by this filter.
    fn continue_decoding(&self);

    /// Answer the request locally and stop the chain.
    fn send_local_reply(&self, status: u16, body: &str);
}

/// Response-path callbacks.
pub trait EncoderFilterCallbacks: StreamFilterCallbacks {
    /// Resume an encoder chain stopped by this filter.
    fn continue_encoding(&self);
}

/// A selected route.
pub trait Route: Send + Sync {
    /// Whether the route forwards upstream (redirects and direct responses
    /// have no route entry).
    fn has_route_entry(&self) -> bool;

    /// The most specific overlay registered under `filter_name` for this
    /// route, walking from the route up to its virtual host.
    fn per_filter_config(&self, filter_name: &str) -> Option<Arc<RouteOverlay>>;
}

/// Request or response headers (and trailers, which share the shape).
pub trait HeaderMap {
    /// First value for `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Replace every value for `key` with `value`.
    fn set(&mut self, key: &str, value: &str);

    /// Add another value for `key`.
    fn add(&mut self, key: &str, value: &str);

    /// Append `value` to the existing value of `key`, comma separated.
    fn append(&mut self, key: &str, value: &str);

    /// Remove every value for `key`.
    fn remove(&mut self, key: &str);

    /// All entries in insertion order.
    fn entries(&self) -> Vec<HeaderPair>;

    /// Entries whose key starts with `prefix`, in insertion order.
    fn scan_prefix(&self, prefix: &str) -> Vec<HeaderPair> {
        self.entries()
            .into_iter()
            .filter(|pair| pair.key.starts_with(prefix))
            .collect()
    }

    /// Write the entries under `prefix` into `out` as a header blob.
    ///
    /// Returns the size the blob needs. If `out` is smaller than that,
    /// nothing is written and the caller retries with a larger buffer.
    ///
    /// # Errors
    ///
    /// Returns a [`MarshalError`](tether_core::MarshalError) if an entry is
    /// too long for its length prefix.
    fn scan_prefix_blob(&self, prefix: &str, out: &mut [u8]) -> MarshalResult<usize> {
        encode_header_blob(&self.scan_prefix(prefix), out)
    }

    /// Add every entry of a guest-supplied header blob; returns how many
    /// were added.
    ///
    /// The blob is decoded in full before the map is touched, so a
    /// malformed blob leaves the map unchanged.
    ///
    /// # Errors
    ///
    /// Returns the [`MarshalError`](tether_core::MarshalError) for the first
    /// malformed field. Its [`code`](tether_core::MarshalError::code) is the
    /// non-zero result handed back to the guest.
    fn add_header_blob(&mut self, blob: &[u8]) -> MarshalResult<usize> {
        let pairs = decode_header_blob(blob)?;
        for pair in &pairs {
            self.add(&pair.key, &pair.value);
        }
        Ok(pairs.len())
    }
}

/// A body chunk.
pub trait BufferInstance {
    /// Total length in bytes.
    fn len(&self) -> usize;

    /// Whether the buffer holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy bytes starting at `start` into `out`; returns the count copied.
    fn copy_out(&self, start: usize, out: &mut [u8]) -> usize;

    /// The buffer's backing slices, in order.
    fn raw_slices(&self) -> Vec<&[u8]>;
}

/// A generic secret configured for the filter.
pub trait SecretProvider: Send + Sync {
    /// The secret value, if it has been loaded.
    fn secret(&self) -> Option<String>;
}

/// Monotone counter.
pub trait Counter: Send + Sync {
    /// Add `amount`.
    fn add(&self, amount: u64);

    /// Add one.
    fn inc(&self) {
        self.add(1);
    }

    /// Current value.
    fn value(&self) -> u64;
}

/// Settable gauge.
pub trait Gauge: Send + Sync {
    /// Set the value.
    fn set(&self, value: u64);

    /// Add `amount`.
    fn add(&self, amount: u64);

    /// Subtract `amount`.
    fn sub(&self, amount: u64);

    /// Current value.
    fn value(&self) -> u64;
}

/// Value distribution.
pub trait Histogram: Send + Sync {
    /// Record one sample.
    fn record(&self, value: u64);
}

/// A statistics namespace. Metrics are created lazily on first lookup and
/// the same name always yields the same metric.
pub trait StatsScope: Send + Sync {
    /// The prefix every metric name in this scope carries.
    fn prefix(&self) -> &str;

    /// Counter called `name`.
    fn counter(&self, name: &str) -> Arc<dyn Counter>;

    /// Gauge called `name`.
    fn gauge(&self, name: &str) -> Arc<dyn Gauge>;

    /// Histogram called `name`.
    fn histogram(&self, name: &str) -> Arc<dyn Histogram>;
}

/// A tracing span owned by the host tracer.
pub trait Span: Send + Sync {
    /// Start a child span at `start`.
    fn spawn_child(&self, name: &str, start: DateTime<Utc>) -> Arc<dyn Span>;

    /// Attach a tag.
    fn set_tag(&self, key: &str, value: &str);

    /// Record a timestamped event.
    fn log(&self, timestamp: DateTime<Utc>, event: &str);

    /// End the span.
    fn finish(&self);
}
