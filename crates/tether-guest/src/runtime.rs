//! The guest runtime: both bridge proxies, backed by tag tables.

use std::any::Any;
use std::convert::identity;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tether_bridge::host::{BufferInstance, HeaderMap, StatsScope};
use tether_bridge::{ConfigProxy, Epoch, FilterInstance, FilterProxy};
use tether_core::{DataStatus, HeadersStatus, TrailersStatus};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{GuestError, GuestResult};
use crate::filter::{GuestConfig, GuestFilter, HttpFilterFactory, RouteConfig};
use crate::handle::{self, FilterHandle, PinGuard, RouteConfigTable};
use crate::registry::FilterRegistry;
use crate::table::HandleTable;

struct FactoryEntry {
    filter_name: String,
    factory: Arc<dyn HttpFilterFactory>,
}

type FilterCell = Mutex<Box<dyn GuestFilter>>;

/// Run `f`, turning a panic into [`GuestError::Panicked`].
fn guarded<R>(operation: &'static str, f: impl FnOnce() -> R) -> GuestResult<R> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|_| GuestError::Panicked { operation })
}

/// In-process guest side of the bridge.
pub struct GuestRuntime {
    registry: Arc<FilterRegistry>,
    factories: HandleTable<FactoryEntry>,
    route_configs: Arc<RouteConfigTable>,
    filters: HandleTable<FilterCell>,
    tokio: Handle,
}

impl fmt::Debug for GuestRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestRuntime")
            .field("registry", &self.registry)
            .field("factories", &self.factories.len())
            .field("route_configs", &self.route_configs.len())
            .field("filters", &self.filters.len())
            .finish_non_exhaustive()
    }
}

impl GuestRuntime {
    /// Create a runtime spawning guest work on `tokio`.
    #[must_use]
    pub fn new(registry: Arc<FilterRegistry>, tokio: Handle) -> Arc<Self> {
        Arc::new(Self {
            registry,
            factories: HandleTable::new(),
            route_configs: Arc::new(HandleTable::new()),
            filters: HandleTable::new(),
            tokio,
        })
    }

    /// Create a runtime on the ambient tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`GuestError::NoRuntime`] outside a tokio runtime.
    pub fn from_current(registry: Arc<FilterRegistry>) -> GuestResult<Arc<Self>> {
        Ok(Self::new(registry, Handle::try_current()?))
    }

    /// The filter registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<FilterRegistry> {
        &self.registry
    }

    /// The guest-side route config behind `tag`.
    #[must_use]
    pub fn route_config(&self, tag: u64) -> Option<RouteConfig> {
        self.route_configs.get(tag)
    }

    /// The route config behind `tag`, if it is a `T`.
    #[must_use]
    pub fn route_config_as<T: Any + Send + Sync>(&self, tag: u64) -> Option<Arc<T>> {
        self.route_config(tag)
            .and_then(|config| config.downcast::<T>().ok())
    }

    /// Run `work` on the tokio runtime while `filter` is pinned. See
    /// [`FilterHandle::spawn_pinned`].
    ///
    /// # Errors
    ///
    /// Returns [`GuestError::InstanceGone`] if the host released the
    /// instance.
    pub fn spawn_pinned<F, Fut>(
        &self,
        filter: &FilterHandle,
        work: F,
    ) -> GuestResult<JoinHandle<Fut::Output>>
    where
        F: FnOnce(Arc<PinGuard>) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        handle::spawn_pinned_on(&self.tokio, filter, work)
    }

    /// Live guest factories.
    #[must_use]
    pub fn factory_count(&self) -> usize {
        self.factories.len()
    }

    /// Live route configs.
    #[must_use]
    pub fn route_config_count(&self) -> usize {
        self.route_configs.len()
    }

    /// Live request filters.
    #[must_use]
    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    fn build_factory(
        &self,
        filter_name: &str,
        settings: &[u8],
        scope: Arc<dyn StatsScope>,
    ) -> GuestResult<Arc<dyn HttpFilterFactory>> {
        let entry = self
            .registry
            .get(filter_name)
            .ok_or_else(|| GuestError::UnknownFilter {
                name: filter_name.to_owned(),
            })?;
        let config = GuestConfig::new(filter_name, settings);
        guarded("create_factory", || entry.create_factory(&config, scope))?
    }

    fn build_route_config(&self, filter_name: &str, config: &[u8]) -> GuestResult<RouteConfig> {
        let entry = self
            .registry
            .get(filter_name)
            .ok_or_else(|| GuestError::UnknownFilter {
                name: filter_name.to_owned(),
            })?;
        let config = GuestConfig::new(filter_name, config);
        guarded("create_route_config", || entry.create_route_config(&config))?
    }

    /// Call into the filter behind `tag`, answering `fallback` if the tag
    /// is unknown or stale, or the guest panics.
    fn call_filter<R>(
        &self,
        tag: u64,
        operation: &'static str,
        fallback: R,
        f: impl FnOnce(&mut dyn GuestFilter) -> R,
    ) -> R {
        if is_stale(&self.filters, tag, operation) {
            return fallback;
        }
        let Some(cell) = self.filters.get(tag) else {
            debug!(tag, operation, "call for unknown filter tag");
            return fallback;
        };
        let mut filter = cell.lock().unwrap_or_else(PoisonError::into_inner);
        match guarded(operation, || f(&mut **filter)) {
            Ok(result) => result,
            Err(e) => {
                error!(tag, error = %e, "guest filter failed, stopping the stage");
                fallback
            },
        }
    }
}

/// Whether `tag` is live in `table` but was minted under an epoch that is
/// no longer the calling thread's. Stale tags are logged and left alone.
fn is_stale<T: ?Sized>(table: &HandleTable<T>, tag: u64, operation: &'static str) -> bool {
    let Some(epoch) = table.stale_epoch(tag) else {
        return false;
    };
    warn!(tag, %epoch, operation, "ignoring guest tag from a stale epoch");
    true
}

impl ConfigProxy for GuestRuntime {
    fn create_factory(
        &self,
        slot: Epoch,
        filter_name: &str,
        settings: &[u8],
        scope: Arc<dyn StatsScope>,
    ) -> u64 {
        match self.build_factory(filter_name, settings, scope) {
            Ok(factory) => {
                let tag = self.factories.insert(
                    slot,
                    Arc::new(FactoryEntry {
                        filter_name: filter_name.to_owned(),
                        factory,
                    }),
                );
                info!(filter = %filter_name, tag, %slot, "guest factory created");
                tag
            },
            Err(e) => {
                error!(filter = %filter_name, error = %e, "guest factory creation failed");
                0
            },
        }
    }

    fn destroy_factory(&self, tag: u64) {
        if is_stale(&self.factories, tag, "destroy_factory") {
            return;
        }
        match self.factories.remove(tag) {
            Some(entry) => debug!(filter = %entry.filter_name, tag, "guest factory destroyed"),
            None => warn!(tag, "destroy for unknown guest factory"),
        }
    }

    fn create_route_config(&self, slot: Epoch, filter_name: &str, config: &[u8]) -> u64 {
        match self.build_route_config(filter_name, config) {
            Ok(route_config) => {
                let tag = self.route_configs.insert(slot, route_config);
                debug!(filter = %filter_name, tag, "guest route config created");
                tag
            },
            Err(e) => {
                error!(filter = %filter_name, error = %e, "guest route config rejected");
                0
            },
        }
    }

    fn destroy_route_config(&self, tag: u64) {
        if is_stale(&self.route_configs, tag, "destroy_route_config") {
            return;
        }
        if self.route_configs.remove(tag).is_none() {
            warn!(tag, "destroy for unknown guest route config");
        }
    }
}

impl FilterProxy for GuestRuntime {
    fn create(&self, native: Weak<FilterInstance>, factory_tag: u64, slot: Epoch) -> u64 {
        if is_stale(&self.factories, factory_tag, "create_filter") {
            return 0;
        }
        let Some(entry) = self.factories.get(factory_tag) else {
            warn!(factory_tag, "filter requested from unknown guest factory");
            return 0;
        };
        let handle = FilterHandle::new(
            native,
            slot,
            self.tokio.clone(),
            Arc::clone(&self.route_configs),
        );
        match guarded("create_filter", || entry.factory.create_filter(handle)).and_then(identity) {
            Ok(filter) => self.filters.insert(slot, Arc::new(Mutex::new(filter))),
            Err(e) => {
                warn!(filter = %entry.filter_name, error = %e, "guest filter creation failed");
                0
            },
        }
    }

    fn on_destroy(&self, tag: u64) {
        if is_stale(&self.filters, tag, "on_destroy") {
            return;
        }
        let Some(cell) = self.filters.remove(tag) else {
            debug!(tag, "destroy for unknown filter tag");
            return;
        };
        let mut filter = cell.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = guarded("on_destroy", || filter.on_destroy()) {
            error!(tag, error = %e, "guest filter failed during teardown");
        }
    }

    fn decode_headers(&self, tag: u64, headers: &mut dyn HeaderMap, end_stream: bool) -> i64 {
        self.call_filter(
            tag,
            "decode_headers",
            HeadersStatus::StopIteration,
            |filter| filter.decode_headers(headers, end_stream),
        )
        .code()
    }

    fn decode_data(&self, tag: u64, buffer: &mut dyn BufferInstance, end_stream: bool) -> i64 {
        self.call_filter(
            tag,
            "decode_data",
            DataStatus::StopIterationNoBuffer,
            |filter| filter.decode_data(buffer, end_stream),
        )
        .code()
    }

    fn decode_trailers(&self, tag: u64, trailers: &mut dyn HeaderMap) -> i64 {
        self.call_filter(
            tag,
            "decode_trailers",
            TrailersStatus::StopIteration,
            |filter| filter.decode_trailers(trailers),
        )
        .code()
    }

    fn encode_headers(&self, tag: u64, headers: &mut dyn HeaderMap, end_stream: bool) -> i64 {
        self.call_filter(
            tag,
            "encode_headers",
            HeadersStatus::StopIteration,
            |filter| filter.encode_headers(headers, end_stream),
        )
        .code()
    }

    fn encode_data(&self, tag: u64, buffer: &mut dyn BufferInstance, end_stream: bool) -> i64 {
        self.call_filter(
            tag,
            "encode_data",
            DataStatus::StopIterationNoBuffer,
            |filter| filter.encode_data(buffer, end_stream),
        )
        .code()
    }

    fn on_post(&self, tag: u64, post_tag: u64) {
        self.call_filter(tag, "on_post", (), |filter| filter.on_post(post_tag));
    }
}
