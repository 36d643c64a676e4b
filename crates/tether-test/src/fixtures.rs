//! Test fixtures for common types.

use tether_bridge::FactorySettings;
use tracing_subscriber::EnvFilter;

use crate::MockHeaderMap;

/// Filter name used by [`test_factory_settings`].
pub const TEST_FILTER_NAME: &str = "security";

/// Request id carried by [`test_request_headers`].
pub const TEST_REQUEST_ID: &str = "req-0001";

/// Install a test-writer subscriber filtered by `RUST_LOG`. Safe to call
/// from every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Factory settings for the `security` filter with a small JSON payload.
#[must_use]
pub fn test_factory_settings() -> FactorySettings {
    FactorySettings::new(TEST_FILTER_NAME, br#"{"provider":"hmac"}"#.to_vec())
}

/// Factory settings for `filter_name` with `settings` as JSON.
#[must_use]
pub fn test_factory_settings_for(filter_name: &str, settings: &str) -> FactorySettings {
    FactorySettings::new(filter_name, settings.as_bytes().to_vec())
}

/// A GET request carrying [`TEST_REQUEST_ID`].
#[must_use]
pub fn test_request_headers() -> MockHeaderMap {
    MockHeaderMap::from_pairs(&[
        (":method", "GET"),
        (":path", "/api/v1/items"),
        (":authority", "example.test"),
        ("x-request-id", TEST_REQUEST_ID),
    ])
}

/// A `200 OK` response.
#[must_use]
pub fn test_response_headers() -> MockHeaderMap {
    MockHeaderMap::from_pairs(&[(":status", "200"), ("content-type", "application/json")])
}
