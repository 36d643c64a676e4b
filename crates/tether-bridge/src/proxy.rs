//! Calls from the bridge into the guest runtime.
//!
//! Every guest object is addressed by a `u64` tag the guest handed out.
//! Zero is never a valid tag; a zero return from a `create_*` call means
//! the guest could not build the object.

use std::sync::{Arc, Weak};

use crate::epoch::Epoch;
use crate::filter::FilterInstance;
use crate::host::{BufferInstance, HeaderMap, StatsScope};

/// Per-request guest calls, made from the dispatcher thread.
///
/// Stage calls return the raw status code; the bridge decodes it.
pub trait FilterProxy: Send + Sync {
    /// Build the guest filter for `native`. `native` cannot be upgraded
    /// until this call returns.
    fn create(&self, native: Weak<FilterInstance>, factory_tag: u64, slot: Epoch) -> u64;

    /// Tell the guest the instance is being torn down. The guest must stop
    /// new work; outstanding workers keep their pins until they finish.
    fn on_destroy(&self, tag: u64);

    /// Request headers.
    fn decode_headers(&self, tag: u64, headers: &mut dyn HeaderMap, end_stream: bool) -> i64;

    /// Request body chunk.
    fn decode_data(&self, tag: u64, buffer: &mut dyn BufferInstance, end_stream: bool) -> i64;

    /// Request trailers.
    fn decode_trailers(&self, tag: u64, trailers: &mut dyn HeaderMap) -> i64;

    /// Response headers.
    fn encode_headers(&self, tag: u64, headers: &mut dyn HeaderMap, end_stream: bool) -> i64;

    /// Response body chunk.
    fn encode_data(&self, tag: u64, buffer: &mut dyn BufferInstance, end_stream: bool) -> i64;

    /// Deliver a callback the guest scheduled with `post`.
    fn on_post(&self, tag: u64, post_tag: u64);
}

/// Configuration-time guest calls.
pub trait ConfigProxy: Send + Sync {
    /// Build a filter factory for the guest filter `filter_name`.
    fn create_factory(
        &self,
        slot: Epoch,
        filter_name: &str,
        settings: &[u8],
        scope: Arc<dyn StatsScope>,
    ) -> u64;

    /// Release a factory.
    fn destroy_factory(&self, tag: u64);

    /// Build the per-route configuration for `filter_name`.
    fn create_route_config(&self, slot: Epoch, filter_name: &str, config: &[u8]) -> u64;

    /// Release a per-route configuration.
    fn destroy_route_config(&self, tag: u64);
}
