//! A filter factory living on its own dispatcher thread.
//!
//! Factories, overlays and instances are bound to the thread that created
//! them. [`BridgeHarness`] creates all of them on a [`ThreadDispatcher`] so
//! tests can play the guest from any other thread. Anything holding a
//! [`RouteOverlay`] must be released on the dispatcher too; use
//! [`BridgeHarness::release`].

use std::sync::Arc;

use tether_bridge::host::{Dispatcher, Route, StatsScope};
use tether_bridge::{
    BridgeResult, ConfigProxy, FactorySettings, FilterFactory, FilterInstance, FilterProxy,
    RouteOverlay,
};

use crate::{InMemoryStats, MockDecoderCallbacks, MockEncoderCallbacks, ThreadDispatcher};

/// One bound stream.
#[derive(Debug, Clone)]
pub struct Stream {
    /// The bridge instance.
    pub instance: Arc<FilterInstance>,
    /// Request-path callbacks.
    pub decoder: Arc<MockDecoderCallbacks>,
    /// Response-path callbacks.
    pub encoder: Arc<MockEncoderCallbacks>,
}

/// A factory plus the dispatcher thread that owns it.
pub struct BridgeHarness {
    dispatcher: Arc<ThreadDispatcher>,
    stats: Arc<InMemoryStats>,
    config_proxy: Arc<dyn ConfigProxy>,
    factory: Option<Arc<FilterFactory>>,
}

impl std::fmt::Debug for BridgeHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHarness")
            .field("dispatcher", &self.dispatcher)
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}

impl BridgeHarness {
    /// Spawn a dispatcher and register the factory on it.
    ///
    /// # Errors
    ///
    /// Returns the factory creation error when the guest fails and
    /// `crash_on_errors` is set.
    pub fn new(
        settings: FactorySettings,
        filter_proxy: Arc<dyn FilterProxy>,
        config_proxy: Arc<dyn ConfigProxy>,
    ) -> BridgeResult<Self> {
        let dispatcher = ThreadDispatcher::spawn("tether-dispatcher");
        let stats = InMemoryStats::new(FilterFactory::stats_prefix(
            "http.",
            &settings.filter_name,
        ));
        let scope: Arc<dyn StatsScope> = stats.clone();
        let proxy = Arc::clone(&config_proxy);
        let factory = dispatcher
            .run(move || FilterFactory::create(settings, scope, proxy, filter_proxy))?;
        Ok(Self {
            dispatcher,
            stats,
            config_proxy,
            factory: Some(factory),
        })
    }

    /// The dispatcher thread.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<ThreadDispatcher> {
        &self.dispatcher
    }

    /// The factory's stats scope.
    #[must_use]
    pub fn stats(&self) -> &Arc<InMemoryStats> {
        &self.stats
    }

    /// The factory.
    ///
    /// # Panics
    ///
    /// Panics if the harness is being torn down.
    #[must_use]
    pub fn factory(&self) -> Arc<FilterFactory> {
        match &self.factory {
            Some(factory) => Arc::clone(factory),
            None => panic!("harness factory already released"),
        }
    }

    /// Drop the harness's own factory reference on the dispatcher, the way
    /// a configuration reload does. Streams opened earlier keep the factory
    /// alive until they are released.
    pub fn release_factory(&mut self) {
        if let Some(factory) = self.factory.take() {
            self.release(factory);
        }
    }

    /// Run `f` on the dispatcher and return its result.
    pub fn run<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.dispatcher.run(f)
    }

    /// Drop `value` on the dispatcher.
    pub fn release<T: Send + 'static>(&self, value: T) {
        self.run(move || drop(value));
    }

    /// Build a route overlay on the dispatcher.
    #[must_use]
    pub fn overlay(&self, entries: Vec<(String, Vec<u8>)>) -> Arc<RouteOverlay> {
        let proxy = Arc::clone(&self.config_proxy);
        self.run(move || Arc::new(RouteOverlay::create(entries, proxy)))
    }

    /// Create an instance and bind fresh callbacks on the dispatcher.
    #[must_use]
    pub fn open_stream(&self) -> Stream {
        self.open_stream_inner(None)
    }

    /// Like [`open_stream`](Self::open_stream), with `route` resolved for the
    /// request.
    #[must_use]
    pub fn open_stream_on(&self, route: Arc<dyn Route>) -> Stream {
        self.open_stream_inner(Some(route))
    }

    fn open_stream_inner(&self, route: Option<Arc<dyn Route>>) -> Stream {
        let factory = self.factory();
        let dispatcher: Arc<dyn Dispatcher> = self.dispatcher.clone();
        self.run(move || {
            let instance = factory.create_filter();
            let decoder = Arc::new(MockDecoderCallbacks::new(Arc::clone(&dispatcher)));
            decoder.set_route(route);
            let encoder = Arc::new(MockEncoderCallbacks::new(dispatcher));
            instance.set_decoder_callbacks(decoder.clone());
            instance.set_encoder_callbacks(encoder.clone());
            Stream {
                instance,
                decoder,
                encoder,
            }
        })
    }

    /// Tear `stream` down on the dispatcher. Blocks while guest pins are
    /// outstanding.
    pub fn destroy(&self, stream: &Stream) {
        let instance = Arc::clone(&stream.instance);
        self.run(move || instance.on_destroy());
    }
}

impl Drop for BridgeHarness {
    fn drop(&mut self) {
        if let Some(factory) = self.factory.take() {
            self.dispatcher.post(Box::new(move || drop(factory)));
        }
        self.dispatcher.shutdown();
    }
}
