//! The guest's view of a bridge instance.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use tether_bridge::host::{DecoderFilterCallbacks, EncoderFilterCallbacks, Span, StatsScope};
use tether_bridge::{Epoch, FilterInstance};
use tether_core::GuestLogLevel;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{GuestError, GuestResult};
use crate::filter::RouteConfig;
use crate::table::HandleTable;

pub(crate) type RouteConfigTable = HandleTable<dyn Any + Send + Sync>;

/// Handle to the bridge instance a [`GuestFilter`](crate::GuestFilter)
/// serves.
///
/// Holds only a weak reference, so the guest never keeps a torn-down
/// instance alive. [`continue_decoding`](Self::continue_decoding),
/// [`continue_encoding`](Self::continue_encoding) and
/// [`send_local_reply`](Self::send_local_reply) touch host callbacks and
/// panic unless called from a stage or `on_post`, i.e. on the dispatcher.
/// Worker threads get back there with [`PinGuard::post`].
#[derive(Clone)]
pub struct FilterHandle {
    native: Weak<FilterInstance>,
    slot: Epoch,
    tokio: Handle,
    route_configs: Arc<RouteConfigTable>,
}

impl fmt::Debug for FilterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterHandle")
            .field("slot", &self.slot)
            .field("alive", &(self.native.strong_count() > 0))
            .finish_non_exhaustive()
    }
}

impl FilterHandle {
    pub(crate) fn new(
        native: Weak<FilterInstance>,
        slot: Epoch,
        tokio: Handle,
        route_configs: Arc<RouteConfigTable>,
    ) -> Self {
        Self {
            native,
            slot,
            tokio,
            route_configs,
        }
    }

    /// The instance-slot epoch the filter was created under.
    #[must_use]
    pub fn slot(&self) -> Epoch {
        self.slot
    }

    /// The instance, if the host still holds it.
    #[must_use]
    pub fn upgrade(&self) -> Option<Arc<FilterInstance>> {
        self.native.upgrade()
    }

    /// Take a pin for work that outlives the current stage.
    ///
    /// # Errors
    ///
    /// Returns [`GuestError::InstanceGone`] if the host released the
    /// instance.
    ///
    /// # Panics
    ///
    /// Panics if teardown already finished; pin from a stage callback.
    pub fn pin(&self) -> GuestResult<PinGuard> {
        let instance = self.upgrade().ok_or(GuestError::InstanceGone)?;
        instance.pin();
        Ok(PinGuard {
            instance: Some(instance),
        })
    }

    /// Run `work` on the tokio runtime while holding a pin. The pin is
    /// returned when the task ends, even if it panics.
    ///
    /// # Errors
    ///
    /// Returns [`GuestError::InstanceGone`] if the host released the
    /// instance.
    pub fn spawn_pinned<F, Fut>(&self, work: F) -> GuestResult<JoinHandle<Fut::Output>>
    where
        F: FnOnce(Arc<PinGuard>) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        spawn_pinned_on(&self.tokio, self, work)
    }

    /// Log through the host with the filter and request id attached.
    pub fn log(&self, level: GuestLogLevel, message: &str) {
        if let Some(instance) = self.upgrade() {
            instance.log(level.as_u32(), message);
        }
    }

    /// Tag of this filter's route config on the current route, or `0`.
    #[must_use]
    pub fn resolve_route_config_tag(&self) -> u64 {
        self.upgrade()
            .map_or(0, |instance| instance.resolve_route_config_tag())
    }

    /// This filter's guest-side config for the current route.
    #[must_use]
    pub fn route_config(&self) -> Option<RouteConfig> {
        match self.resolve_route_config_tag() {
            0 => None,
            tag => self.route_configs.get(tag),
        }
    }

    /// Like [`route_config`](Self::route_config), downcast to `T`.
    #[must_use]
    pub fn route_config_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.route_config()
            .and_then(|config| config.downcast::<T>().ok())
    }

    /// The configured generic secret.
    #[must_use]
    pub fn secret(&self) -> Option<String> {
        self.upgrade().and_then(|instance| instance.secret())
    }

    /// The factory's stats scope.
    #[must_use]
    pub fn stats_scope(&self) -> Option<Arc<dyn StatsScope>> {
        self.upgrade().map(|instance| instance.stats_scope())
    }

    /// Open a child span under `parent_id`.
    #[must_use]
    pub fn spawn_child_span(&self, parent_id: i64, name: &str) -> Option<i64> {
        self.upgrade()
            .map(|instance| instance.spawn_child_span(parent_id, name))
    }

    /// Finish a span opened with [`spawn_child_span`](Self::spawn_child_span).
    pub fn finish_span(&self, span_id: i64) {
        if let Some(instance) = self.upgrade() {
            instance.finish_span(span_id);
        }
    }

    /// Set a tag on a span.
    pub fn set_span_tag(&self, span_id: i64, key: &str, value: &str) {
        if let Some(instance) = self.upgrade() {
            instance.span(span_id).set_tag(key, value);
        }
    }

    /// Resume a request stopped in a decode stage.
    pub fn continue_decoding(&self) {
        if let Some(instance) = self.upgrade() {
            instance.decoder_callbacks().continue_decoding();
        }
    }

    /// Resume a response stopped in an encode stage.
    pub fn continue_encoding(&self) {
        if let Some(instance) = self.upgrade() {
            instance.encoder_callbacks().continue_encoding();
        }
    }

    /// Answer the request directly.
    pub fn send_local_reply(&self, status: u16, body: &str) {
        if let Some(instance) = self.upgrade() {
            instance.decoder_callbacks().send_local_reply(status, body);
        }
    }
}

pub(crate) fn spawn_pinned_on<F, Fut>(
    tokio: &Handle,
    handle: &FilterHandle,
    work: F,
) -> GuestResult<JoinHandle<Fut::Output>>
where
    F: FnOnce(Arc<PinGuard>) -> Fut,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let guard = Arc::new(handle.pin()?);
    let task = work(Arc::clone(&guard));
    Ok(tokio.spawn(async move {
        let _pin = guard;
        task.await
    }))
}

/// A held pin. Dropping it returns the pin; the last one lets a waiting
/// teardown proceed.
///
/// The guard's reference to the instance is handed back to the host
/// dispatcher on drop, so a worker never frees host objects.
pub struct PinGuard {
    instance: Option<Arc<FilterInstance>>,
}

impl fmt::Debug for PinGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinGuard")
            .field("instance", &self.instance)
            .finish()
    }
}

impl PinGuard {
    /// Schedule [`GuestFilter::on_post`](crate::GuestFilter::on_post) on
    /// the dispatcher. Dropped silently if the request is over by then.
    pub fn post(&self, post_tag: u64) {
        if let Some(instance) = &self.instance {
            instance.post(post_tag);
        }
    }

    /// Log from a worker thread.
    pub fn log(&self, level: GuestLogLevel, message: &str) {
        if let Some(instance) = &self.instance {
            instance.log(level.as_u32(), message);
        }
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            instance.release_pin();
        }
    }
}
