//! Mock implementations for testing.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use tether_bridge::host::{
    BufferInstance, Counter, DecoderFilterCallbacks, Dispatcher, EncoderFilterCallbacks, Gauge,
    HeaderMap, Histogram, Route, SecretProvider, Span, StatsScope, StreamFilterCallbacks,
};
use tether_bridge::{
    ConfigProxy, Epoch, FilterInstance, FilterProxy, HOST_FILTER_NAME, RouteOverlay,
};
use tether_core::{DataStatus, HeaderPair, HeadersStatus, TrailersStatus};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------
// Guest doubles
// ----------------------------------------------------------------------

/// One call the bridge made into a [`MockProxy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyCall {
    /// `create`.
    Create {
        /// Guest factory tag.
        factory_tag: u64,
    },
    /// `on_destroy`.
    OnDestroy {
        /// Filter tag.
        tag: u64,
    },
    /// `decode_headers`.
    DecodeHeaders {
        /// Filter tag.
        tag: u64,
        /// End-of-stream flag.
        end_stream: bool,
    },
    /// `decode_data`.
    DecodeData {
        /// Filter tag.
        tag: u64,
        /// Buffer length.
        len: usize,
        /// End-of-stream flag.
        end_stream: bool,
    },
    /// `decode_trailers`.
    DecodeTrailers {
        /// Filter tag.
        tag: u64,
    },
    /// `encode_headers`.
    EncodeHeaders {
        /// Filter tag.
        tag: u64,
        /// End-of-stream flag.
        end_stream: bool,
    },
    /// `encode_data`.
    EncodeData {
        /// Filter tag.
        tag: u64,
        /// Buffer length.
        len: usize,
        /// End-of-stream flag.
        end_stream: bool,
    },
    /// `on_post`.
    OnPost {
        /// Filter tag.
        tag: u64,
        /// Caller-chosen post tag.
        post_tag: u64,
    },
}

/// Scripted [`FilterProxy`] that records every call.
///
/// Stage statuses are raw codes so tests can script values outside the
/// table.
#[derive(Debug)]
pub struct MockProxy {
    next_tag: AtomicU64,
    fail_create: AtomicBool,
    headers_status: AtomicI64,
    data_status: AtomicI64,
    trailers_status: AtomicI64,
    calls: Mutex<Vec<ProxyCall>>,
    natives: Mutex<HashMap<u64, (Weak<FilterInstance>, Epoch)>>,
}

impl MockProxy {
    /// Create a proxy whose stages all continue.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_tag: AtomicU64::new(1),
            fail_create: AtomicBool::new(false),
            headers_status: AtomicI64::new(HeadersStatus::Continue.code()),
            data_status: AtomicI64::new(DataStatus::Continue.code()),
            trailers_status: AtomicI64::new(TrailersStatus::Continue.code()),
            calls: Mutex::new(Vec::new()),
            natives: Mutex::new(HashMap::new()),
        })
    }

    /// Make every later `create` fail with tag `0`.
    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    /// Code returned by both headers stages.
    pub fn set_headers_status(&self, code: i64) {
        self.headers_status.store(code, Ordering::SeqCst);
    }

    /// Code returned by both data stages.
    pub fn set_data_status(&self, code: i64) {
        self.data_status.store(code, Ordering::SeqCst);
    }

    /// Code returned by `decode_trailers`.
    pub fn set_trailers_status(&self, code: i64) {
        self.trailers_status.store(code, Ordering::SeqCst);
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProxyCall> {
        lock(&self.calls).clone()
    }

    /// `(tag, post_tag)` of every delivered post.
    #[must_use]
    pub fn posts(&self) -> Vec<(u64, u64)> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                ProxyCall::OnPost { tag, post_tag } => Some((*tag, *post_tag)),
                _ => None,
            })
            .collect()
    }

    /// Tags passed to `on_destroy`.
    #[must_use]
    pub fn destroyed(&self) -> Vec<u64> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                ProxyCall::OnDestroy { tag } => Some(*tag),
                _ => None,
            })
            .collect()
    }

    /// The native handle passed to `create` for `tag`.
    #[must_use]
    pub fn native(&self, tag: u64) -> Option<Weak<FilterInstance>> {
        lock(&self.natives).get(&tag).map(|(native, _)| native.clone())
    }

    /// The instance-slot epoch passed to `create` for `tag`.
    #[must_use]
    pub fn slot(&self, tag: u64) -> Option<Epoch> {
        lock(&self.natives).get(&tag).map(|(_, slot)| *slot)
    }

    fn record(&self, call: ProxyCall) {
        lock(&self.calls).push(call);
    }
}

impl FilterProxy for MockProxy {
    fn create(&self, native: Weak<FilterInstance>, factory_tag: u64, slot: Epoch) -> u64 {
        self.record(ProxyCall::Create { factory_tag });
        if self.fail_create.load(Ordering::SeqCst) {
            return 0;
        }
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        lock(&self.natives).insert(tag, (native, slot));
        tag
    }

    fn on_destroy(&self, tag: u64) {
        self.record(ProxyCall::OnDestroy { tag });
    }

    fn decode_headers(&self, tag: u64, _headers: &mut dyn HeaderMap, end_stream: bool) -> i64 {
        self.record(ProxyCall::DecodeHeaders { tag, end_stream });
        self.headers_status.load(Ordering::SeqCst)
    }

    fn decode_data(&self, tag: u64, buffer: &mut dyn BufferInstance, end_stream: bool) -> i64 {
        self.record(ProxyCall::DecodeData {
            tag,
            len: buffer.len(),
            end_stream,
        });
        self.data_status.load(Ordering::SeqCst)
    }

    fn decode_trailers(&self, tag: u64, _trailers: &mut dyn HeaderMap) -> i64 {
        self.record(ProxyCall::DecodeTrailers { tag });
        self.trailers_status.load(Ordering::SeqCst)
    }

    fn encode_headers(&self, tag: u64, _headers: &mut dyn HeaderMap, end_stream: bool) -> i64 {
        self.record(ProxyCall::EncodeHeaders { tag, end_stream });
        self.headers_status.load(Ordering::SeqCst)
    }

    fn encode_data(&self, tag: u64, buffer: &mut dyn BufferInstance, end_stream: bool) -> i64 {
        self.record(ProxyCall::EncodeData {
            tag,
            len: buffer.len(),
            end_stream,
        });
        self.data_status.load(Ordering::SeqCst)
    }

    fn on_post(&self, tag: u64, post_tag: u64) {
        self.record(ProxyCall::OnPost { tag, post_tag });
    }
}

/// A guest factory created through [`MockConfigProxy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedFactory {
    /// Guest tag.
    pub tag: u64,
    /// Filter name.
    pub filter_name: String,
    /// Raw settings bytes.
    pub settings: Vec<u8>,
    /// Stats prefix of the scope handed over.
    pub scope_prefix: String,
}

/// Scripted [`ConfigProxy`] that records factories and route configs.
#[derive(Debug)]
pub struct MockConfigProxy {
    next_tag: AtomicU64,
    fail_factories: AtomicBool,
    reject_route_configs: AtomicBool,
    factories: Mutex<Vec<CreatedFactory>>,
    destroyed_factories: Mutex<Vec<u64>>,
    route_configs: Mutex<Vec<(u64, String, Vec<u8>)>>,
    destroyed_route_configs: Mutex<Vec<u64>>,
}

impl MockConfigProxy {
    /// Create a proxy that accepts everything.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_tag: AtomicU64::new(1),
            fail_factories: AtomicBool::new(false),
            reject_route_configs: AtomicBool::new(false),
            factories: Mutex::new(Vec::new()),
            destroyed_factories: Mutex::new(Vec::new()),
            route_configs: Mutex::new(Vec::new()),
            destroyed_route_configs: Mutex::new(Vec::new()),
        })
    }

    /// Make every later `create_factory` return `0`.
    pub fn fail_factories(&self) {
        self.fail_factories.store(true, Ordering::SeqCst);
    }

    /// Make every later `create_route_config` return `0`.
    pub fn reject_route_configs(&self) {
        self.reject_route_configs.store(true, Ordering::SeqCst);
    }

    /// Factories created so far, including failed attempts (tag `0`).
    #[must_use]
    pub fn factories(&self) -> Vec<CreatedFactory> {
        lock(&self.factories).clone()
    }

    /// Tags passed to `destroy_factory`.
    #[must_use]
    pub fn destroyed_factories(&self) -> Vec<u64> {
        lock(&self.destroyed_factories).clone()
    }

    /// `(tag, filter_name, config)` of every route config created.
    #[must_use]
    pub fn route_configs(&self) -> Vec<(u64, String, Vec<u8>)> {
        lock(&self.route_configs).clone()
    }

    /// Tags passed to `destroy_route_config`.
    #[must_use]
    pub fn destroyed_route_configs(&self) -> Vec<u64> {
        lock(&self.destroyed_route_configs).clone()
    }

    fn mint(&self, fail: &AtomicBool) -> u64 {
        if fail.load(Ordering::SeqCst) {
            0
        } else {
            self.next_tag.fetch_add(1, Ordering::SeqCst)
        }
    }
}

impl ConfigProxy for MockConfigProxy {
    fn create_factory(
        &self,
        _slot: Epoch,
        filter_name: &str,
        settings: &[u8],
        scope: Arc<dyn StatsScope>,
    ) -> u64 {
        let tag = self.mint(&self.fail_factories);
        lock(&self.factories).push(CreatedFactory {
            tag,
            filter_name: filter_name.to_owned(),
            settings: settings.to_vec(),
            scope_prefix: scope.prefix().to_owned(),
        });
        tag
    }

    fn destroy_factory(&self, tag: u64) {
        lock(&self.destroyed_factories).push(tag);
    }

    fn create_route_config(&self, _slot: Epoch, filter_name: &str, config: &[u8]) -> u64 {
        let tag = self.mint(&self.reject_route_configs);
        lock(&self.route_configs).push((tag, filter_name.to_owned(), config.to_vec()));
        tag
    }

    fn destroy_route_config(&self, tag: u64) {
        lock(&self.destroyed_route_configs).push(tag);
    }
}

// ----------------------------------------------------------------------
// Host doubles
// ----------------------------------------------------------------------

/// Span that records tags, logs, children and finishes.
#[derive(Debug)]
pub struct RecordingSpan {
    name: String,
    start: DateTime<Utc>,
    tags: Mutex<Vec<(String, String)>>,
    logs: Mutex<Vec<(DateTime<Utc>, String)>>,
    children: Mutex<Vec<Arc<RecordingSpan>>>,
    finished: AtomicUsize,
}

impl RecordingSpan {
    /// Create a root span started now.
    #[must_use]
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self::started(name, Utc::now()))
    }

    fn started(name: &str, start: DateTime<Utc>) -> Self {
        Self {
            name: name.to_owned(),
            start,
            tags: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
            finished: AtomicUsize::new(0),
        }
    }

    /// Operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start time.
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Tags in the order they were set.
    #[must_use]
    pub fn tags(&self) -> Vec<(String, String)> {
        lock(&self.tags).clone()
    }

    /// Logged events.
    #[must_use]
    pub fn logs(&self) -> Vec<(DateTime<Utc>, String)> {
        lock(&self.logs).clone()
    }

    /// Children spawned from this span.
    #[must_use]
    pub fn children(&self) -> Vec<Arc<RecordingSpan>> {
        lock(&self.children).clone()
    }

    /// How many times `finish` was called.
    #[must_use]
    pub fn finish_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl Span for RecordingSpan {
    fn spawn_child(&self, name: &str, start: DateTime<Utc>) -> Arc<dyn Span> {
        let child = Arc::new(Self::started(name, start));
        lock(&self.children).push(Arc::clone(&child));
        child
    }

    fn set_tag(&self, key: &str, value: &str) {
        lock(&self.tags).push((key.to_owned(), value.to_owned()));
    }

    fn log(&self, timestamp: DateTime<Utc>, event: &str) {
        lock(&self.logs).push((timestamp, event.to_owned()));
    }

    fn finish(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Request-path callbacks that record local replies.
pub struct MockDecoderCallbacks {
    dispatcher: Arc<dyn Dispatcher>,
    span: Arc<RecordingSpan>,
    route: Mutex<Option<Arc<dyn Route>>>,
    local_replies: Mutex<Vec<(u16, String)>>,
    continued: AtomicUsize,
}

impl std::fmt::Debug for MockDecoderCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDecoderCallbacks")
            .field("span", &self.span.name())
            .field("local_replies", &self.local_replies())
            .finish_non_exhaustive()
    }
}

impl MockDecoderCallbacks {
    /// Callbacks bound to `dispatcher` with a fresh ambient span.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            dispatcher,
            span: RecordingSpan::new("decoder"),
            route: Mutex::new(None),
            local_replies: Mutex::new(Vec::new()),
            continued: AtomicUsize::new(0),
        }
    }

    /// Use `span` as the ambient span.
    #[must_use]
    pub fn with_span(mut self, span: Arc<RecordingSpan>) -> Self {
        self.span = span;
        self
    }

    /// Resolve `route` for the stream.
    #[must_use]
    pub fn with_route(self, route: Arc<dyn Route>) -> Self {
        self.set_route(Some(route));
        self
    }

    /// Replace the stream's route.
    pub fn set_route(&self, route: Option<Arc<dyn Route>>) {
        *lock(&self.route) = route;
    }

    /// The ambient span.
    #[must_use]
    pub fn span(&self) -> Arc<RecordingSpan> {
        Arc::clone(&self.span)
    }

    /// `(status, body)` of every local reply.
    #[must_use]
    pub fn local_replies(&self) -> Vec<(u16, String)> {
        lock(&self.local_replies).clone()
    }

    /// How many times decoding was resumed.
    #[must_use]
    pub fn continue_count(&self) -> usize {
        self.continued.load(Ordering::SeqCst)
    }
}

impl StreamFilterCallbacks for MockDecoderCallbacks {
    fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    fn active_span(&self) -> Arc<dyn Span> {
        self.span.clone()
    }

    fn route(&self) -> Option<Arc<dyn Route>> {
        lock(&self.route).clone()
    }
}

impl DecoderFilterCallbacks for MockDecoderCallbacks {
    fn continue_decoding(&self) {
        self.continued.fetch_add(1, Ordering::SeqCst);
    }

    fn send_local_reply(&self, status: u16, body: &str) {
        lock(&self.local_replies).push((status, body.to_owned()));
    }
}

/// Response-path callbacks.
pub struct MockEncoderCallbacks {
    dispatcher: Arc<dyn Dispatcher>,
    span: Arc<RecordingSpan>,
    continued: AtomicUsize,
}

impl std::fmt::Debug for MockEncoderCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockEncoderCallbacks")
            .field("span", &self.span.name())
            .finish_non_exhaustive()
    }
}

impl MockEncoderCallbacks {
    /// Callbacks bound to `dispatcher` with a fresh ambient span.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            dispatcher,
            span: RecordingSpan::new("encoder"),
            continued: AtomicUsize::new(0),
        }
    }

    /// The ambient span.
    #[must_use]
    pub fn span(&self) -> Arc<RecordingSpan> {
        Arc::clone(&self.span)
    }

    /// How many times encoding was resumed.
    #[must_use]
    pub fn continue_count(&self) -> usize {
        self.continued.load(Ordering::SeqCst)
    }
}

impl StreamFilterCallbacks for MockEncoderCallbacks {
    fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    fn active_span(&self) -> Arc<dyn Span> {
        self.span.clone()
    }

    fn route(&self) -> Option<Arc<dyn Route>> {
        None
    }
}

impl EncoderFilterCallbacks for MockEncoderCallbacks {
    fn continue_encoding(&self) {
        self.continued.fetch_add(1, Ordering::SeqCst);
    }
}

/// Route that optionally carries an overlay for the bridge.
///
/// The overlay must be released on the dispatcher that created it, so drop
/// the route there too.
#[derive(Debug)]
pub struct MockRoute {
    has_entry: bool,
    overlay: Option<Arc<RouteOverlay>>,
}

impl MockRoute {
    /// A route entry carrying `overlay` under the bridge's filter name.
    #[must_use]
    pub fn with_overlay(overlay: Arc<RouteOverlay>) -> Arc<Self> {
        Arc::new(Self {
            has_entry: true,
            overlay: Some(overlay),
        })
    }

    /// A route entry without per-filter config.
    #[must_use]
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            has_entry: true,
            overlay: None,
        })
    }

    /// A route without an entry (e.g. a direct response).
    #[must_use]
    pub fn without_entry() -> Arc<Self> {
        Arc::new(Self {
            has_entry: false,
            overlay: None,
        })
    }
}

impl Route for MockRoute {
    fn has_route_entry(&self) -> bool {
        self.has_entry
    }

    fn per_filter_config(&self, filter_name: &str) -> Option<Arc<RouteOverlay>> {
        if filter_name == HOST_FILTER_NAME {
            self.overlay.clone()
        } else {
            None
        }
    }
}

/// Ordered multimap of headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockHeaderMap {
    pairs: Vec<HeaderPair>,
}

impl MockHeaderMap {
    /// Empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map holding `pairs` in order.
    #[must_use]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            pairs: pairs
                .iter()
                .map(|(key, value)| HeaderPair::new(*key, *value))
                .collect(),
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl HeaderMap for MockHeaderMap {
    fn get(&self, key: &str) -> Option<String> {
        self.pairs
            .iter()
            .find(|pair| pair.key.eq_ignore_ascii_case(key))
            .map(|pair| pair.value.clone())
    }

    fn set(&mut self, key: &str, value: &str) {
        self.remove(key);
        self.add(key, value);
    }

    fn add(&mut self, key: &str, value: &str) {
        self.pairs.push(HeaderPair::new(key, value));
    }

    fn append(&mut self, key: &str, value: &str) {
        match self
            .pairs
            .iter_mut()
            .find(|pair| pair.key.eq_ignore_ascii_case(key))
        {
            Some(pair) => {
                pair.value.push(',');
                pair.value.push_str(value);
            },
            None => self.add(key, value),
        }
    }

    fn remove(&mut self, key: &str) {
        self.pairs.retain(|pair| !pair.key.eq_ignore_ascii_case(key));
    }

    fn entries(&self) -> Vec<HeaderPair> {
        self.pairs.clone()
    }
}

/// Body made of one or more slices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockBuffer {
    slices: Vec<Vec<u8>>,
}

impl MockBuffer {
    /// Single-slice buffer.
    #[must_use]
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            slices: vec![bytes.to_vec()],
        }
    }

    /// Buffer split into the given slices.
    #[must_use]
    pub fn from_slices(slices: Vec<Vec<u8>>) -> Self {
        Self { slices }
    }

    /// All bytes, concatenated.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.slices.concat()
    }
}

impl BufferInstance for MockBuffer {
    fn len(&self) -> usize {
        self.slices.iter().map(Vec::len).sum()
    }

    fn copy_out(&self, start: usize, out: &mut [u8]) -> usize {
        let bytes = self.to_vec();
        let src = bytes.get(start..).unwrap_or_default();
        let count = src.len().min(out.len());
        out[..count].copy_from_slice(&src[..count]);
        count
    }

    fn raw_slices(&self) -> Vec<&[u8]> {
        self.slices.iter().map(Vec::as_slice).collect()
    }
}

/// Fixed secret.
#[derive(Debug, Clone, Default)]
pub struct MockSecretProvider(Option<String>);

impl MockSecretProvider {
    /// Provider returning `secret`.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Arc<Self> {
        Arc::new(Self(Some(secret.into())))
    }

    /// Provider that has nothing.
    #[must_use]
    pub fn missing() -> Arc<Self> {
        Arc::new(Self(None))
    }
}

impl SecretProvider for MockSecretProvider {
    fn secret(&self) -> Option<String> {
        self.0.clone()
    }
}

/// In-memory counter.
#[derive(Debug, Default)]
pub struct InMemoryCounter(AtomicU64);

impl Counter for InMemoryCounter {
    fn add(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::Relaxed);
    }

    fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// In-memory gauge. Saturates at zero.
#[derive(Debug, Default)]
pub struct InMemoryGauge(AtomicU64);

impl Gauge for InMemoryGauge {
    fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    fn add(&self, amount: u64) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_add(amount))
            });
    }

    fn sub(&self, amount: u64) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(amount))
            });
    }

    fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// In-memory histogram keeping every sample.
#[derive(Debug, Default)]
pub struct InMemoryHistogram(Mutex<Vec<u64>>);

impl InMemoryHistogram {
    /// Samples in recording order.
    #[must_use]
    pub fn samples(&self) -> Vec<u64> {
        lock(&self.0).clone()
    }
}

impl Histogram for InMemoryHistogram {
    fn record(&self, value: u64) {
        lock(&self.0).push(value);
    }
}

/// Stats scope creating metrics lazily by name.
#[derive(Debug, Default)]
pub struct InMemoryStats {
    prefix: String,
    counters: Mutex<BTreeMap<String, Arc<InMemoryCounter>>>,
    gauges: Mutex<BTreeMap<String, Arc<InMemoryGauge>>>,
    histograms: Mutex<BTreeMap<String, Arc<InMemoryHistogram>>>,
}

impl InMemoryStats {
    /// Scope with the given prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            prefix: prefix.into(),
            ..Self::default()
        })
    }

    /// Counter value, if the counter was ever looked up.
    #[must_use]
    pub fn counter_value(&self, name: &str) -> Option<u64> {
        lock(&self.counters).get(name).map(|c| c.value())
    }

    /// Gauge value, if the gauge was ever looked up.
    #[must_use]
    pub fn gauge_value(&self, name: &str) -> Option<u64> {
        lock(&self.gauges).get(name).map(|g| g.value())
    }

    /// Histogram samples, empty if never looked up.
    #[must_use]
    pub fn histogram_samples(&self, name: &str) -> Vec<u64> {
        lock(&self.histograms)
            .get(name)
            .map(|h| h.samples())
            .unwrap_or_default()
    }
}

impl StatsScope for InMemoryStats {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn counter(&self, name: &str) -> Arc<dyn Counter> {
        lock(&self.counters)
            .entry(name.to_owned())
            .or_default()
            .clone()
    }

    fn gauge(&self, name: &str) -> Arc<dyn Gauge> {
        lock(&self.gauges).entry(name.to_owned()).or_default().clone()
    }

    fn histogram(&self, name: &str) -> Arc<dyn Histogram> {
        lock(&self.histograms)
            .entry(name.to_owned())
            .or_default()
            .clone()
    }
}
