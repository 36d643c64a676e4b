//! Minimal host doubles for this crate's unit tests. The full set lives in
//! `tether-test`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use chrono::{DateTime, TimeZone, Utc};

use crate::host::{
    DecoderFilterCallbacks, Dispatcher, EncoderFilterCallbacks, Route, Span, StreamFilterCallbacks,
};

type Task = Box<dyn FnOnce() + Send>;

/// Dispatcher owned by the creating thread; posted work runs on
/// [`run_pending`](Self::run_pending).
pub(crate) struct QueueDispatcher {
    owner: ThreadId,
    queue: Mutex<VecDeque<Task>>,
    clock: DateTime<Utc>,
}

impl QueueDispatcher {
    pub(crate) fn new() -> Self {
        Self {
            owner: std::thread::current().id(),
            queue: Mutex::new(VecDeque::new()),
            clock: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    pub(crate) fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.queue.lock().unwrap().pop_front();
            let Some(task) = next else { return ran };
            task();
            ran = ran.saturating_add(1);
        }
    }
}

impl Dispatcher for QueueDispatcher {
    fn post(&self, callback: Task) {
        self.queue.lock().unwrap().push_back(callback);
    }

    fn is_thread_safe(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock
    }
}

/// Span that remembers what happened to it.
pub(crate) struct TestSpan {
    name: String,
    start: DateTime<Utc>,
    tags: Mutex<Vec<(String, String)>>,
    children: Mutex<Vec<Arc<TestSpan>>>,
    finished: AtomicUsize,
}

impl TestSpan {
    pub(crate) fn new(name: &str) -> Self {
        Self::started(name, Utc::now())
    }

    fn started(name: &str, start: DateTime<Utc>) -> Self {
        Self {
            name: name.to_owned(),
            start,
            tags: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
            finished: AtomicUsize::new(0),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub(crate) fn tags(&self) -> Vec<(String, String)> {
        self.tags.lock().unwrap().clone()
    }

    pub(crate) fn children(&self) -> Vec<Arc<TestSpan>> {
        self.children.lock().unwrap().clone()
    }

    pub(crate) fn finish_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl Span for TestSpan {
    fn spawn_child(&self, name: &str, start: DateTime<Utc>) -> Arc<dyn Span> {
        let child = Arc::new(TestSpan::started(name, start));
        self.children.lock().unwrap().push(child.clone());
        child
    }

    fn set_tag(&self, key: &str, value: &str) {
        self.tags
            .lock()
            .unwrap()
            .push((key.to_owned(), value.to_owned()));
    }

    fn log(&self, _timestamp: DateTime<Utc>, _event: &str) {}

    fn finish(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Decoder and encoder callbacks in one object.
pub(crate) struct StubCallbacks {
    dispatcher: Arc<QueueDispatcher>,
    pub(crate) span: Arc<TestSpan>,
    pub(crate) route: Mutex<Option<Arc<dyn Route>>>,
    pub(crate) local_replies: Mutex<Vec<u16>>,
}

impl StubCallbacks {
    pub(crate) fn new(dispatcher: QueueDispatcher) -> Arc<Self> {
        Self::with_span(dispatcher, Arc::new(TestSpan::new("ambient")))
    }

    pub(crate) fn with_span(dispatcher: QueueDispatcher, span: Arc<TestSpan>) -> Arc<Self> {
        Arc::new(Self {
            dispatcher: Arc::new(dispatcher),
            span,
            route: Mutex::new(None),
            local_replies: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn queue(&self) -> &QueueDispatcher {
        &self.dispatcher
    }
}

impl StreamFilterCallbacks for StubCallbacks {
    fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        self.dispatcher.clone()
    }

    fn active_span(&self) -> Arc<dyn Span> {
        self.span.clone()
    }

    fn route(&self) -> Option<Arc<dyn Route>> {
        self.route.lock().unwrap().clone()
    }
}

impl DecoderFilterCallbacks for StubCallbacks {
    fn continue_decoding(&self) {}

    fn send_local_reply(&self, status: u16, _body: &str) {
        self.local_replies.lock().unwrap().push(status);
    }
}

impl EncoderFilterCallbacks for StubCallbacks {
    fn continue_encoding(&self) {}
}

/// Route with an optional overlay under the bridge's filter name.
pub(crate) struct TestRoute {
    pub(crate) has_entry: bool,
    pub(crate) overlay: Option<Arc<crate::overlay::RouteOverlay>>,
}

impl Route for TestRoute {
    fn has_route_entry(&self) -> bool {
        self.has_entry
    }

    fn per_filter_config(&self, filter_name: &str) -> Option<Arc<crate::overlay::RouteOverlay>> {
        if filter_name == crate::factory::HOST_FILTER_NAME {
            self.overlay.clone()
        } else {
            None
        }
    }
}

/// Header map over a list of pairs.
#[derive(Default)]
pub(crate) struct TestHeaders(pub(crate) Vec<tether_core::HeaderPair>);

impl crate::host::HeaderMap for TestHeaders {
    fn get(&self, key: &str) -> Option<String> {
        self.0.iter().find(|p| p.key == key).map(|p| p.value.clone())
    }

    fn set(&mut self, key: &str, value: &str) {
        self.remove(key);
        self.add(key, value);
    }

    fn add(&mut self, key: &str, value: &str) {
        self.0.push(tether_core::HeaderPair::new(key, value));
    }

    fn append(&mut self, key: &str, value: &str) {
        match self.0.iter_mut().find(|p| p.key == key) {
            Some(pair) => {
                pair.value.push(',');
                pair.value.push_str(value);
            },
            None => self.add(key, value),
        }
    }

    fn remove(&mut self, key: &str) {
        self.0.retain(|p| p.key != key);
    }

    fn entries(&self) -> Vec<tether_core::HeaderPair> {
        self.0.clone()
    }
}

/// Single-slice body.
#[derive(Default)]
pub(crate) struct TestBuffer(pub(crate) Vec<u8>);

impl crate::host::BufferInstance for TestBuffer {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn copy_out(&self, start: usize, out: &mut [u8]) -> usize {
        let src = self.0.get(start..).unwrap_or_default();
        let n = src.len().min(out.len());
        out[..n].copy_from_slice(&src[..n]);
        n
    }

    fn raw_slices(&self) -> Vec<&[u8]> {
        vec![&self.0]
    }
}

/// Counter, gauge and histogram backed by one atomic.
#[derive(Default)]
pub(crate) struct TestMetric(std::sync::atomic::AtomicU64);

impl crate::host::Counter for TestMetric {
    fn add(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::SeqCst);
    }

    fn value(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl crate::host::Gauge for TestMetric {
    fn set(&self, value: u64) {
        self.0.store(value, Ordering::SeqCst);
    }

    fn add(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::SeqCst);
    }

    fn sub(&self, amount: u64) {
        self.0.fetch_sub(amount, Ordering::SeqCst);
    }

    fn value(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl crate::host::Histogram for TestMetric {
    fn record(&self, value: u64) {
        self.0.store(value, Ordering::SeqCst);
    }
}

/// Scope that hands out a fresh metric per lookup.
pub(crate) struct StubScope(String);

impl StubScope {
    pub(crate) fn new(prefix: &str) -> Arc<Self> {
        Arc::new(Self(prefix.to_owned()))
    }
}

impl crate::host::StatsScope for StubScope {
    fn prefix(&self) -> &str {
        &self.0
    }

    fn counter(&self, _name: &str) -> Arc<dyn crate::host::Counter> {
        Arc::new(TestMetric::default())
    }

    fn gauge(&self, _name: &str) -> Arc<dyn crate::host::Gauge> {
        Arc::new(TestMetric::default())
    }

    fn histogram(&self, _name: &str) -> Arc<dyn crate::host::Histogram> {
        Arc::new(TestMetric::default())
    }
}

/// Guest stand-in for both proxies.
pub(crate) struct StubProxy {
    next_tag: std::sync::atomic::AtomicU64,
    fail_factories: std::sync::atomic::AtomicBool,
    fail_filters: std::sync::atomic::AtomicBool,
    reject_routes: std::sync::atomic::AtomicBool,
    status: std::sync::atomic::AtomicI64,
    created_factories: Mutex<Vec<String>>,
    destroyed_factories: Mutex<Vec<u64>>,
    route_configs: Mutex<Vec<(String, Vec<u8>)>>,
    destroyed_route_configs: Mutex<Vec<u64>>,
    calls: Mutex<Vec<&'static str>>,
    posts: Mutex<Vec<(u64, u64)>>,
    destroyed_filters: Mutex<Vec<u64>>,
}

impl StubProxy {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_tag: std::sync::atomic::AtomicU64::new(1),
            fail_factories: std::sync::atomic::AtomicBool::new(false),
            fail_filters: std::sync::atomic::AtomicBool::new(false),
            reject_routes: std::sync::atomic::AtomicBool::new(false),
            status: std::sync::atomic::AtomicI64::new(100),
            created_factories: Mutex::new(Vec::new()),
            destroyed_factories: Mutex::new(Vec::new()),
            route_configs: Mutex::new(Vec::new()),
            destroyed_route_configs: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            posts: Mutex::new(Vec::new()),
            destroyed_filters: Mutex::new(Vec::new()),
        })
    }

    fn mint(&self) -> u64 {
        self.next_tag.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn fail_factories(&self) {
        self.fail_factories.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_filters(&self) {
        self.fail_filters.store(true, Ordering::SeqCst);
    }

    pub(crate) fn reject_route_configs(&self) {
        self.reject_routes.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_status(&self, code: i64) {
        self.status.store(code, Ordering::SeqCst);
    }

    pub(crate) fn created_factories(&self) -> Vec<String> {
        self.created_factories.lock().unwrap().clone()
    }

    pub(crate) fn destroyed_factories(&self) -> Vec<u64> {
        self.destroyed_factories.lock().unwrap().clone()
    }

    pub(crate) fn route_configs(&self) -> Vec<(String, Vec<u8>)> {
        self.route_configs.lock().unwrap().clone()
    }

    pub(crate) fn destroyed_route_configs(&self) -> Vec<u64> {
        self.destroyed_route_configs.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn posts(&self) -> Vec<(u64, u64)> {
        self.posts.lock().unwrap().clone()
    }

    pub(crate) fn destroyed_filters(&self) -> Vec<u64> {
        self.destroyed_filters.lock().unwrap().clone()
    }

    fn stage(&self, name: &'static str) -> i64 {
        self.calls.lock().unwrap().push(name);
        self.status.load(Ordering::SeqCst)
    }
}

impl crate::proxy::FilterProxy for StubProxy {
    fn create(
        &self,
        _native: std::sync::Weak<crate::filter::FilterInstance>,
        _factory_tag: u64,
        _slot: crate::epoch::Epoch,
    ) -> u64 {
        self.calls.lock().unwrap().push("create");
        if self.fail_filters.load(Ordering::SeqCst) {
            0
        } else {
            self.mint()
        }
    }

    fn on_destroy(&self, tag: u64) {
        self.destroyed_filters.lock().unwrap().push(tag);
    }

    fn decode_headers(
        &self,
        _tag: u64,
        _headers: &mut dyn crate::host::HeaderMap,
        _end_stream: bool,
    ) -> i64 {
        self.stage("decode_headers")
    }

    fn decode_data(
        &self,
        _tag: u64,
        _buffer: &mut dyn crate::host::BufferInstance,
        _end_stream: bool,
    ) -> i64 {
        self.stage("decode_data")
    }

    fn decode_trailers(&self, _tag: u64, _trailers: &mut dyn crate::host::HeaderMap) -> i64 {
        self.stage("decode_trailers")
    }

    fn encode_headers(
        &self,
        _tag: u64,
        _headers: &mut dyn crate::host::HeaderMap,
        _end_stream: bool,
    ) -> i64 {
        self.stage("encode_headers")
    }

    fn encode_data(
        &self,
        _tag: u64,
        _buffer: &mut dyn crate::host::BufferInstance,
        _end_stream: bool,
    ) -> i64 {
        self.stage("encode_data")
    }

    fn on_post(&self, tag: u64, post_tag: u64) {
        self.posts.lock().unwrap().push((tag, post_tag));
    }
}

impl crate::proxy::ConfigProxy for StubProxy {
    fn create_factory(
        &self,
        _slot: crate::epoch::Epoch,
        filter_name: &str,
        _settings: &[u8],
        _scope: Arc<dyn crate::host::StatsScope>,
    ) -> u64 {
        self.created_factories
            .lock()
            .unwrap()
            .push(filter_name.to_owned());
        if self.fail_factories.load(Ordering::SeqCst) {
            0
        } else {
            self.mint()
        }
    }

    fn destroy_factory(&self, tag: u64) {
        self.destroyed_factories.lock().unwrap().push(tag);
    }

    fn create_route_config(
        &self,
        _slot: crate::epoch::Epoch,
        filter_name: &str,
        config: &[u8],
    ) -> u64 {
        self.route_configs
            .lock()
            .unwrap()
            .push((filter_name.to_owned(), config.to_vec()));
        if self.reject_routes.load(Ordering::SeqCst) {
            0
        } else {
            self.mint()
        }
    }

    fn destroy_route_config(&self, tag: u64) {
        self.destroyed_route_configs.lock().unwrap().push(tag);
    }
}
