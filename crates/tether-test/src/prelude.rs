//! Prelude module - commonly used test doubles for convenient import.
//!
//! Use `use tether_test::prelude::*;` in test modules.

// Dispatchers
pub use crate::{ManualDispatcher, ThreadDispatcher};

// Harness
pub use crate::{BridgeHarness, Stream};

// Host doubles
pub use crate::{
    InMemoryStats, MockBuffer, MockDecoderCallbacks, MockEncoderCallbacks, MockHeaderMap,
    MockRoute, MockSecretProvider, RecordingSpan,
};

// Guest doubles
pub use crate::{MockConfigProxy, MockProxy, ProxyCall};

// Fixtures
pub use crate::{init_test_logging, test_factory_settings, test_request_headers};
