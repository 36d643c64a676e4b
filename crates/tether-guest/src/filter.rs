//! Traits guest filter authors implement.
//!
//! Three levels, matching the bridge's objects:
//!
//! - [`HttpFilterFactoryFactory`]: registered by name, builds one
//!   [`HttpFilterFactory`] per configuration load and one [`RouteConfig`]
//!   per route overlay entry
//! - [`HttpFilterFactory`]: builds one [`GuestFilter`] per request
//! - [`GuestFilter`]: sees the request and response stages

use std::any::Any;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tether_bridge::host::{BufferInstance, HeaderMap, StatsScope};
use tether_core::{DataStatus, HeadersStatus, TrailersStatus};

use crate::error::{GuestError, GuestResult};
use crate::handle::FilterHandle;

/// Guest-side per-route object, downcast by the filter that created it.
pub type RouteConfig = Arc<dyn Any + Send + Sync>;

/// Settings handed to guest constructors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestConfig {
    filter_name: String,
    settings: Vec<u8>,
}

impl GuestConfig {
    /// Settings for `filter_name`.
    #[must_use]
    pub fn new(filter_name: impl Into<String>, settings: impl Into<Vec<u8>>) -> Self {
        Self {
            filter_name: filter_name.into(),
            settings: settings.into(),
        }
    }

    /// Filter name.
    #[must_use]
    pub fn filter_name(&self) -> &str {
        &self.filter_name
    }

    /// Raw settings bytes.
    #[must_use]
    pub fn settings(&self) -> &[u8] {
        &self.settings
    }

    /// Parse the settings as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`GuestError::InvalidSettings`] if they do not parse as `T`.
    pub fn settings_json<T: DeserializeOwned>(&self) -> GuestResult<T> {
        serde_json::from_slice(&self.settings).map_err(|source| GuestError::InvalidSettings {
            filter: self.filter_name.clone(),
            source,
        })
    }
}

/// Entry point a guest registers under a filter name.
pub trait HttpFilterFactoryFactory: Send + Sync {
    /// Build the factory for one configuration load.
    ///
    /// # Errors
    ///
    /// Any error marks the factory as failed; the host then either fails the
    /// load or answers every request with a local `500`.
    fn create_factory(
        &self,
        config: &GuestConfig,
        scope: Arc<dyn StatsScope>,
    ) -> GuestResult<Arc<dyn HttpFilterFactory>>;

    /// Build a per-route config. Keeps the raw bytes by default.
    ///
    /// # Errors
    ///
    /// Any error rejects the route configuration.
    fn create_route_config(&self, config: &GuestConfig) -> GuestResult<RouteConfig> {
        Ok(Arc::new(config.settings().to_vec()))
    }
}

/// Per-load factory of request filters.
pub trait HttpFilterFactory: Send + Sync {
    /// Build the filter for one request.
    ///
    /// # Errors
    ///
    /// Any error makes the host answer the request with a local `500`.
    fn create_filter(&self, handle: FilterHandle) -> GuestResult<Box<dyn GuestFilter>>;
}

/// One request's guest filter. Every stage continues by default.
///
/// Stage methods run on the host dispatcher; long work belongs in
/// [`GuestRuntime::spawn_pinned`](crate::GuestRuntime::spawn_pinned).
pub trait GuestFilter: Send {
    /// Request headers.
    fn decode_headers(&mut self, _headers: &mut dyn HeaderMap, _end_stream: bool) -> HeadersStatus {
        HeadersStatus::Continue
    }

    /// Request body chunk.
    fn decode_data(&mut self, _buffer: &mut dyn BufferInstance, _end_stream: bool) -> DataStatus {
        DataStatus::Continue
    }

    /// Request trailers.
    fn decode_trailers(&mut self, _trailers: &mut dyn HeaderMap) -> TrailersStatus {
        TrailersStatus::Continue
    }

    /// Response headers.
    fn encode_headers(&mut self, _headers: &mut dyn HeaderMap, _end_stream: bool) -> HeadersStatus {
        HeadersStatus::Continue
    }

    /// Response body chunk.
    fn encode_data(&mut self, _buffer: &mut dyn BufferInstance, _end_stream: bool) -> DataStatus {
        DataStatus::Continue
    }

    /// A callback scheduled with [`PinGuard::post`](crate::PinGuard::post).
    fn on_post(&mut self, _post_tag: u64) {}

    /// The request is over. No stage follows.
    fn on_destroy(&mut self) {}
}
