//! The per-request filter instance.
//!
//! # Lifecycle
//!
//! ```text
//! Constructing -> Bound -> Active -> Destroying -> Destroyed
//! ```
//!
//! The host builds the instance, binds decoder then encoder callbacks,
//! drives protocol stages, and finally calls [`FilterInstance::on_destroy`].
//! Guest worker threads hold *pins* while they may call back. `on_destroy`
//! gives up the chain's own pin and blocks the dispatcher until every other
//! pin is returned, so no guest callback can reach host callbacks after the
//! host has been told the filter is gone.
//!
//! `post` does not pin. The keepalive reference captured by `post` keeps the
//! instance alive until delivery, and delivery after teardown is dropped
//! because the guest tag is already cleared by then.

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError, RwLock};

use tether_core::{DataStatus, GuestLogLevel, HeadersStatus, MetadataStatus, TrailersStatus};
use tracing::{debug, error, info, trace, warn};

use crate::epoch::{Epoch, SlotKind};
use crate::factory::{FilterFactory, HOST_FILTER_NAME};
use crate::host::{
    BufferInstance, DecoderFilterCallbacks, Dispatcher, EncoderFilterCallbacks, HeaderMap, Span,
    StatsScope, StreamFilterCallbacks,
};
use crate::proxy::FilterProxy;
use crate::scheduler::{self, Deliverable};
use crate::span::SpanRegistry;

/// Header carrying the request id used for log correlation.
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Status the host sends when the guest could not build the filter.
const CONSTRUCTION_FAILED_STATUS: u16 = 500;

/// Where an instance is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Built, callbacks not yet bound.
    Constructing,
    /// Decoder and encoder callbacks bound.
    Bound,
    /// At least one protocol stage has run.
    Active,
    /// `on_destroy` is running.
    Destroying,
    /// Terminal.
    Destroyed,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Constructing,
            1 => Self::Bound,
            2 => Self::Active,
            3 => Self::Destroying,
            _ => Self::Destroyed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Constructing => 0,
            Self::Bound => 1,
            Self::Active => 2,
            Self::Destroying => 3,
            Self::Destroyed => 4,
        }
    }
}

#[derive(Default)]
struct Bindings {
    dispatcher: Option<Arc<dyn Dispatcher>>,
    decoder: Option<Arc<dyn DecoderFilterCallbacks>>,
    encoder: Option<Arc<dyn EncoderFilterCallbacks>>,
}

impl Bindings {
    fn is_complete(&self) -> bool {
        self.dispatcher.is_some() && self.decoder.is_some() && self.encoder.is_some()
    }
}

/// One request's bridge to its guest filter.
pub struct FilterInstance {
    factory: Arc<FilterFactory>,
    proxy: Arc<dyn FilterProxy>,
    /// Instance-slot epoch at construction; `0` once torn down.
    epoch: AtomicU64,
    /// Guest tag; `0` if construction failed or teardown has begun.
    tag: AtomicU64,
    pins: AtomicI32,
    gate: Mutex<()>,
    drained: Condvar,
    keepalive: Mutex<Option<Arc<FilterInstance>>>,
    bindings: RwLock<Bindings>,
    spans: SpanRegistry,
    state: AtomicU8,
    request_id: OnceLock<String>,
}

impl fmt::Debug for FilterInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterInstance")
            .field("filter", &self.factory.filter_name())
            .field("tag", &self.tag())
            .field("pins", &self.pins())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl FilterInstance {
    /// Build the instance and ask the guest for its filter.
    ///
    /// Instances of a dead factory never reach the guest and start with tag
    /// `0`. The instance keeps itself alive until [`on_destroy`] returns.
    ///
    /// [`on_destroy`]: Self::on_destroy
    #[must_use]
    pub fn new(factory: Arc<FilterFactory>) -> Arc<Self> {
        let epoch = SlotKind::Instance.slot().current();
        let proxy = factory.filter_proxy();
        let instance = Arc::new_cyclic(|native| {
            let tag = if factory.is_dead() {
                0
            } else {
                proxy.create(native.clone(), factory.tag().id, epoch)
            };
            Self {
                factory,
                proxy,
                epoch: AtomicU64::new(epoch.value()),
                tag: AtomicU64::new(tag),
                pins: AtomicI32::new(1),
                gate: Mutex::new(()),
                drained: Condvar::new(),
                keepalive: Mutex::new(None),
                bindings: RwLock::new(Bindings::default()),
                spans: SpanRegistry::new(),
                state: AtomicU8::new(LifecycleState::Constructing.as_u8()),
                request_id: OnceLock::new(),
            }
        });
        *instance
            .keepalive
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&instance));

        let tag = instance.tag();
        if tag == 0 {
            warn!(
                filter = %instance.factory.filter_name(),
                "guest could not create filter, requests will be answered locally"
            );
        } else {
            trace!(
                filter = %instance.factory.filter_name(),
                tag,
                %epoch,
                "created filter instance"
            );
        }
        instance
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Current guest tag; `0` after a failed construction or once teardown
    /// began.
    #[must_use]
    pub fn tag(&self) -> u64 {
        self.tag.load(Ordering::Acquire)
    }

    /// Outstanding pins, including the chain's own.
    #[must_use]
    pub fn pins(&self) -> i32 {
        self.pins.load(Ordering::Acquire)
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The instance-slot epoch, or `None` once torn down.
    #[must_use]
    pub fn epoch(&self) -> Option<Epoch> {
        match self.epoch.load(Ordering::Acquire) {
            0 => None,
            value => Some(Epoch::from_raw(SlotKind::Instance, value)),
        }
    }

    /// The owning factory.
    #[must_use]
    pub fn factory(&self) -> &Arc<FilterFactory> {
        &self.factory
    }

    /// The request id seen on the request headers, or `""`.
    #[must_use]
    pub fn request_id(&self) -> &str {
        self.request_id.get().map_or("", String::as_str)
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn read_bindings(&self) -> std::sync::RwLockReadGuard<'_, Bindings> {
        self.bindings.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether we are on the bound dispatcher, within our epoch, with all
    /// callbacks bound.
    fn is_safe(&self) -> bool {
        let Some(epoch) = self.epoch() else {
            return false;
        };
        let bindings = self.read_bindings();
        epoch.is_current()
            && bindings.is_complete()
            && bindings
                .dispatcher
                .as_ref()
                .is_some_and(|dispatcher| dispatcher.is_thread_safe())
    }

    fn assert_safe(&self, operation: &str) {
        assert!(
            self.is_safe(),
            "{operation} on filter '{}' outside its bound dispatcher context",
            self.factory.filter_name()
        );
    }

    fn enter_stage(&self, stage: &str) -> u64 {
        self.assert_safe(stage);
        if self.state() == LifecycleState::Bound {
            self.set_state(LifecycleState::Active);
        }
        self.tag()
    }

    // ------------------------------------------------------------------
    // Binding
    // ------------------------------------------------------------------

    /// Bind the request-path callbacks and, through them, the dispatcher.
    ///
    /// If the guest could not build the filter, this immediately answers the
    /// request with a local `500`.
    ///
    /// # Panics
    ///
    /// Panics if decoder callbacks were already bound or the instance has
    /// no outstanding pins.
    pub fn set_decoder_callbacks(&self, callbacks: Arc<dyn DecoderFilterCallbacks>) {
        assert!(self.pins() > 0, "decoder callbacks bound after teardown");
        {
            let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
            assert!(bindings.decoder.is_none(), "decoder callbacks bound twice");
            assert!(bindings.dispatcher.is_none(), "dispatcher bound twice");
            bindings.dispatcher = Some(callbacks.dispatcher());
            bindings.decoder = Some(Arc::clone(&callbacks));
            if bindings.is_complete() {
                self.set_state(LifecycleState::Bound);
            }
        }
        self.spans.set_decoder_callbacks(Arc::clone(&callbacks));

        if self.tag() == 0 {
            callbacks.send_local_reply(CONSTRUCTION_FAILED_STATUS, "");
        }
    }

    /// Bind the response-path callbacks.
    ///
    /// # Panics
    ///
    /// Panics if encoder callbacks were already bound or the instance has
    /// no outstanding pins.
    pub fn set_encoder_callbacks(&self, callbacks: Arc<dyn EncoderFilterCallbacks>) {
        assert!(self.pins() > 0, "encoder callbacks bound after teardown");
        {
            let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
            assert!(bindings.encoder.is_none(), "encoder callbacks bound twice");
            bindings.encoder = Some(Arc::clone(&callbacks));
            if bindings.is_complete() {
                self.set_state(LifecycleState::Bound);
            }
        }
        self.spans.set_encoder_callbacks(callbacks);
    }

    // ------------------------------------------------------------------
    // Protocol stages
    // ------------------------------------------------------------------

    /// Request headers. Captures `x-request-id` for log correlation.
    pub fn decode_headers(&self, headers: &mut dyn HeaderMap, end_stream: bool) -> HeadersStatus {
        let tag = self.enter_stage("decode_headers");
        if self.request_id.get().is_none()
            && let Some(id) = headers.get(REQUEST_ID_HEADER)
        {
            let _ = self.request_id.set(id);
        }
        if tag == 0 {
            return HeadersStatus::StopIteration;
        }
        HeadersStatus::from_code(self.proxy.decode_headers(tag, headers, end_stream))
    }

    /// Request body chunk.
    pub fn decode_data(&self, buffer: &mut dyn BufferInstance, end_stream: bool) -> DataStatus {
        let tag = self.enter_stage("decode_data");
        if tag == 0 {
            return DataStatus::StopIterationNoBuffer;
        }
        DataStatus::from_code(self.proxy.decode_data(tag, buffer, end_stream))
    }

    /// Request trailers.
    pub fn decode_trailers(&self, trailers: &mut dyn HeaderMap) -> TrailersStatus {
        let tag = self.enter_stage("decode_trailers");
        if tag == 0 {
            return TrailersStatus::StopIteration;
        }
        TrailersStatus::from_code(self.proxy.decode_trailers(tag, trailers))
    }

    /// `100-continue` headers pass straight through.
    pub fn encode_100_continue_headers(&self, _headers: &mut dyn HeaderMap) -> HeadersStatus {
        HeadersStatus::Continue
    }

    /// Response headers.
    pub fn encode_headers(&self, headers: &mut dyn HeaderMap, end_stream: bool) -> HeadersStatus {
        let tag = self.enter_stage("encode_headers");
        if tag == 0 {
            return HeadersStatus::StopIteration;
        }
        HeadersStatus::from_code(self.proxy.encode_headers(tag, headers, end_stream))
    }

    /// Response body chunk.
    pub fn encode_data(&self, buffer: &mut dyn BufferInstance, end_stream: bool) -> DataStatus {
        let tag = self.enter_stage("encode_data");
        if tag == 0 {
            return DataStatus::StopIterationNoBuffer;
        }
        DataStatus::from_code(self.proxy.encode_data(tag, buffer, end_stream))
    }

    /// Response trailers pass straight through.
    pub fn encode_trailers(&self, _trailers: &mut dyn HeaderMap) -> TrailersStatus {
        TrailersStatus::Continue
    }

    /// Response metadata passes straight through.
    pub fn encode_metadata(
        &self,
        _metadata: &mut std::collections::HashMap<String, String>,
    ) -> MetadataStatus {
        MetadataStatus::Continue
    }

    /// End of the response stream.
    pub fn encode_complete(&self) {
        trace!(
            filter = %self.factory.filter_name(),
            request_id = %self.request_id(),
            "encode complete"
        );
    }

    // ------------------------------------------------------------------
    // Pins and teardown
    // ------------------------------------------------------------------

    /// Take a pin before handing work to a guest thread.
    ///
    /// # Panics
    ///
    /// Panics if no pin is outstanding, i.e. teardown already finished.
    pub fn pin(&self) {
        let prev = self.pins.fetch_add(1, Ordering::AcqRel);
        assert!(prev > 0, "pin on filter '{}' after teardown", self.factory.filter_name());
    }

    /// Return a pin. The last one wakes a waiting [`on_destroy`].
    ///
    /// # Panics
    ///
    /// Panics if no pin is outstanding.
    ///
    /// [`on_destroy`]: Self::on_destroy
    pub fn unpin(&self) {
        let prev = self.pins.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "unbalanced unpin on filter '{}'", self.factory.filter_name());
        if prev == 1 {
            // Publish the zero under the gate so the waiter cannot miss it.
            let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
            self.drained.notify_one();
        }
    }

    /// Return a pin taken for a guest thread and give up that thread's
    /// reference to the instance.
    ///
    /// Off the dispatcher the reference is posted back and released there,
    /// so the last reference never drops host objects on a guest thread.
    ///
    /// # Panics
    ///
    /// Panics if no pin is outstanding.
    pub fn release_pin(self: Arc<Self>) {
        // Read before unpinning: teardown clears the bindings once the
        // count reaches zero.
        let dispatcher = self.read_bindings().dispatcher.clone();
        self.unpin();
        match dispatcher {
            Some(dispatcher) if !dispatcher.is_thread_safe() => {
                dispatcher.post(Box::new(move || drop(self)));
            },
            _ => drop(self),
        }
    }

    /// Tear the instance down. Blocks the calling dispatcher until every
    /// guest pin has been returned.
    ///
    /// # Panics
    ///
    /// Panics if called off the bound dispatcher, outside the instance's
    /// epoch, or twice.
    pub fn on_destroy(&self) {
        self.assert_safe("on_destroy");
        self.set_state(LifecycleState::Destroying);

        let tag = self.tag.swap(0, Ordering::AcqRel);
        if tag != 0 {
            self.proxy.on_destroy(tag);
        }
        self.epoch.store(0, Ordering::Release);

        let prev = self.pins.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "on_destroy without the chain's pin");
        if prev > 1 {
            debug!(
                filter = %self.factory.filter_name(),
                request_id = %self.request_id(),
                outstanding = prev.saturating_sub(1),
                "waiting for guest pins"
            );
            let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
            while self.pins.load(Ordering::Acquire) != 0 {
                gate = self
                    .drained
                    .wait(gate)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        // The host still holds its own reference, so this never drops the
        // last one.
        let keepalive = self
            .keepalive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(keepalive);

        *self.bindings.write().unwrap_or_else(PoisonError::into_inner) = Bindings::default();
        self.spans.clear_bindings();
        self.set_state(LifecycleState::Destroyed);
        trace!(filter = %self.factory.filter_name(), tag, "filter instance destroyed");
    }

    // ------------------------------------------------------------------
    // Guest callbacks
    // ------------------------------------------------------------------

    /// Schedule `on_post(post_tag)` on the dispatcher. Callable from any
    /// thread while the caller holds a pin.
    ///
    /// # Panics
    ///
    /// Panics if no pin is outstanding or no dispatcher is bound yet.
    pub fn post(&self, post_tag: u64) {
        assert!(
            self.pins() > 0,
            "post on filter '{}' after teardown",
            self.factory.filter_name()
        );
        let dispatcher = self.read_bindings().dispatcher.clone();
        let Some(dispatcher) = dispatcher else {
            panic!(
                "post on filter '{}' before decoder callbacks were bound",
                self.factory.filter_name()
            );
        };
        let keepalive = self
            .keepalive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(target) = keepalive else {
            panic!("post on filter '{}' after teardown", self.factory.filter_name());
        };
        scheduler::schedule(dispatcher.as_ref(), target, post_tag);
    }

    /// Deliver a posted callback. Runs on the dispatcher.
    pub fn on_post(&self, post_tag: u64) {
        let tag = self.tag();
        if tag == 0 {
            debug!(
                filter = %self.factory.filter_name(),
                request_id = %self.request_id(),
                post_tag,
                "dropping post delivered after teardown"
            );
            return;
        }
        self.assert_safe("on_post");
        self.proxy.on_post(tag, post_tag);
    }

    /// Log a guest message at a numeric level (`0` trace .. `5` critical,
    /// `6` off).
    pub fn log(&self, level: u32, message: &str) {
        let filter = self.factory.filter_name();
        let request_id = self.request_id();
        match GuestLogLevel::from_u32(level) {
            Some(GuestLogLevel::Trace) => trace!(filter, request_id, "{message}"),
            Some(GuestLogLevel::Debug) => debug!(filter, request_id, "{message}"),
            Some(GuestLogLevel::Info) => info!(filter, request_id, "{message}"),
            Some(GuestLogLevel::Warn) => warn!(filter, request_id, "{message}"),
            Some(GuestLogLevel::Error) => error!(filter, request_id, "{message}"),
            Some(GuestLogLevel::Critical) => {
                error!(filter, request_id, critical = true, "{message}");
            },
            Some(GuestLogLevel::Off) => {},
            None => warn!(filter, request_id, level, "undefined log level: {message}"),
        }
    }

    /// The guest tag of the most specific route config for this filter, or
    /// `0` if there is none.
    #[must_use]
    pub fn resolve_route_config_tag(&self) -> u64 {
        let decoder = self.read_bindings().decoder.clone();
        let Some(route) = decoder.and_then(|callbacks| callbacks.route()) else {
            return 0;
        };
        if !route.has_route_entry() {
            return 0;
        }
        route
            .per_filter_config(HOST_FILTER_NAME)
            .map_or(0, |overlay| overlay.lookup(self.factory.filter_name()))
    }

    /// The configured generic secret, if any.
    #[must_use]
    pub fn secret(&self) -> Option<String> {
        self.factory
            .secret_provider()
            .and_then(|provider| provider.secret())
    }

    /// The factory's stats scope.
    #[must_use]
    pub fn stats_scope(&self) -> Arc<dyn StatsScope> {
        self.factory.scope()
    }

    /// Bound decoder callbacks.
    ///
    /// # Panics
    ///
    /// Panics if called off the bound dispatcher, outside the instance's
    /// epoch, or before binding. Guest threads reach the callbacks through
    /// [`post`](Self::post).
    #[must_use]
    pub fn decoder_callbacks(&self) -> Arc<dyn DecoderFilterCallbacks> {
        self.assert_safe("decoder_callbacks");
        let decoder = self.read_bindings().decoder.clone();
        let Some(decoder) = decoder else {
            panic!("decoder callbacks used while unbound");
        };
        decoder
    }

    /// Bound encoder callbacks.
    ///
    /// # Panics
    ///
    /// Panics if called off the bound dispatcher, outside the instance's
    /// epoch, or before binding.
    #[must_use]
    pub fn encoder_callbacks(&self) -> Arc<dyn EncoderFilterCallbacks> {
        self.assert_safe("encoder_callbacks");
        let encoder = self.read_bindings().encoder.clone();
        let Some(encoder) = encoder else {
            panic!("encoder callbacks used while unbound");
        };
        encoder
    }

    /// Decoder or encoder callbacks viewed through their shared half.
    #[must_use]
    pub fn stream_callbacks(&self, encoder: bool) -> Arc<dyn StreamFilterCallbacks> {
        if encoder {
            let callbacks: Arc<dyn StreamFilterCallbacks> = self.encoder_callbacks();
            return callbacks;
        }
        let callbacks: Arc<dyn StreamFilterCallbacks> = self.decoder_callbacks();
        callbacks
    }

    // ------------------------------------------------------------------
    // Spans
    // ------------------------------------------------------------------

    /// Open a child span; see [`SpanRegistry::spawn_child`].
    pub fn spawn_child_span(&self, parent_id: i64, name: &str) -> i64 {
        self.spans.spawn_child(parent_id, name)
    }

    /// Finish a span; see [`SpanRegistry::finish`].
    pub fn finish_span(&self, span_id: i64) {
        self.spans.finish(span_id);
    }

    /// Resolve a span id; see [`SpanRegistry::get`].
    #[must_use]
    pub fn span(&self, span_id: i64) -> Arc<dyn Span> {
        self.spans.get(span_id)
    }
}

impl Deliverable for FilterInstance {
    fn deliver(&self, post_tag: u64) {
        self.on_post(post_tag);
    }
}
