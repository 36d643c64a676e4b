//! Shared helpers for integration tests.

use std::sync::Arc;

use tether_test::{
    BridgeHarness, MockConfigProxy, MockProxy, init_test_logging, test_factory_settings,
};

/// A harness wired to fresh mock proxies.
#[allow(dead_code)]
pub struct MockBridge {
    /// Dispatcher thread plus factory.
    pub harness: BridgeHarness,
    /// Per-request guest double.
    pub proxy: Arc<MockProxy>,
    /// Configuration guest double.
    pub config: Arc<MockConfigProxy>,
}

#[allow(dead_code)]
impl MockBridge {
    /// Build a bridge for the `security` fixture filter.
    pub fn new() -> Self {
        init_test_logging();
        let proxy = MockProxy::new();
        let config = MockConfigProxy::new();
        let harness = BridgeHarness::new(test_factory_settings(), proxy.clone(), config.clone())
            .expect("factory creation should succeed");
        Self {
            harness,
            proxy,
            config,
        }
    }
}

/// Run `f` on a fresh OS thread and re-raise its panic, if any, here.
#[allow(dead_code)]
pub fn on_other_thread<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Err(panic) = std::thread::spawn(f).join() {
        std::panic::resume_unwind(panic);
    }
}
