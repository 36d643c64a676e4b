//! Per-route configuration overlays.
//!
//! A route may carry settings for any number of guest filters. The overlay
//! builds one guest object per `(filter, settings)` pair when the route
//! table loads and releases them all together when the route table goes
//! away.

use std::collections::BTreeMap;
use std::sync::Arc;

use tether_config::RouteSection;
use tracing::debug;

use crate::epoch::{Epoch, SlotKind};
use crate::error::BridgeResult;
use crate::proxy::ConfigProxy;

type DestroyFn = Box<dyn FnOnce(&BTreeMap<String, u64>) + Send + Sync>;

/// Guest-side route configs for one route, keyed by guest filter name.
pub struct RouteOverlay {
    filters: BTreeMap<String, u64>,
    epoch: Epoch,
    on_destroy: Option<DestroyFn>,
}

impl std::fmt::Debug for RouteOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteOverlay")
            .field("filters", &self.filters)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl RouteOverlay {
    /// Create one guest route config per entry of `settings_per_route`.
    ///
    /// # Panics
    ///
    /// Panics if the guest rejects any entry (returns tag `0`). Route
    /// settings are validated before they reach the bridge, so a rejection
    /// here is a guest bug.
    #[must_use]
    pub fn create<I>(settings_per_route: I, proxy: Arc<dyn ConfigProxy>) -> Self
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        let epoch = SlotKind::RouteOverlay.slot().current();
        let mut filters = BTreeMap::new();
        for (name, config) in settings_per_route {
            let tag = proxy.create_route_config(epoch, &name, &config);
            assert!(tag != 0, "guest rejected route config for filter '{name}'");
            filters.insert(name, tag);
        }
        debug!(%epoch, filters = filters.len(), "created route overlay");

        let on_destroy: DestroyFn = Box::new(move |filters: &BTreeMap<String, u64>| {
            assert!(
                epoch.is_current(),
                "route overlay {epoch} released outside its epoch"
            );
            for tag in filters.values() {
                proxy.destroy_route_config(*tag);
            }
        });

        Self {
            filters,
            epoch,
            on_destroy: Some(on_destroy),
        }
    }

    /// Build the overlay for the route `route` of a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a filter's settings cannot be encoded.
    pub fn from_route_section(
        route: &str,
        section: &RouteSection,
        proxy: Arc<dyn ConfigProxy>,
    ) -> BridgeResult<Self> {
        Ok(Self::create(section.encoded_filters(route)?, proxy))
    }

    /// The guest tag registered for `filter_name`, or `0`.
    #[must_use]
    pub fn lookup(&self, filter_name: &str) -> u64 {
        self.filters.get(filter_name).copied().unwrap_or(0)
    }

    /// The epoch shared by every entry.
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Number of filters configured on this route.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether no filter is configured on this route.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Drop for RouteOverlay {
    fn drop(&mut self) {
        if let Some(on_destroy) = self.on_destroy.take() {
            on_destroy(&self.filters);
        }
    }
}
