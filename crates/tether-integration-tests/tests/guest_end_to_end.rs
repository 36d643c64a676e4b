//! A real guest filter driven through the bridge from a configuration file.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Deserialize;
use tether_bridge::host::{HeaderMap, Route, StatsScope};
use tether_bridge::{ConfigProxy, DECODER_SPAN, FactorySettings, FilterProxy, RouteOverlay};
use tether_config::BridgeConfig;
use tether_core::HeadersStatus;
use tether_guest::{
    FilterHandle, FilterRegistry, GuestConfig, GuestFilter, GuestResult, GuestRuntime,
    HttpFilterFactory, HttpFilterFactoryFactory, RouteConfig,
};
use tether_telemetry::LogConfig;
use tether_test::{BridgeHarness, MockRoute, init_test_logging, test_request_headers};
use tokio::runtime::Runtime;

const ALLOW: u64 = 1;
const DENY: u64 = 2;

const CONFIG: &str = r#"
[filter]
name = "quota"
crash_on_errors = true

[filter.settings]
delay_ms = 5

[routes.gold.filters.quota]
tier = "gold"

[routes.blocked.filters.quota]
tier = "blocked"
deny = true

[logging]
level = "debug"
format = "compact"
directives = ["tether_bridge=trace"]
"#;

#[derive(Debug, Deserialize)]
struct QuotaSettings {
    #[serde(default)]
    delay_ms: u64,
}

#[derive(Debug, Deserialize)]
struct Tier {
    tier: String,
    #[serde(default)]
    deny: bool,
}

struct QuotaFactoryFactory;

impl HttpFilterFactoryFactory for QuotaFactoryFactory {
    fn create_factory(
        &self,
        config: &GuestConfig,
        scope: Arc<dyn StatsScope>,
    ) -> GuestResult<Arc<dyn HttpFilterFactory>> {
        let settings: QuotaSettings = config.settings_json()?;
        Ok(Arc::new(QuotaFactory {
            delay: Duration::from_millis(settings.delay_ms),
            scope,
        }))
    }

    fn create_route_config(&self, config: &GuestConfig) -> GuestResult<RouteConfig> {
        let tier: Tier = config.settings_json()?;
        Ok(Arc::new(tier))
    }
}

struct QuotaFactory {
    delay: Duration,
    scope: Arc<dyn StatsScope>,
}

impl HttpFilterFactory for QuotaFactory {
    fn create_filter(&self, handle: FilterHandle) -> GuestResult<Box<dyn GuestFilter>> {
        Ok(Box::new(QuotaFilter {
            handle,
            delay: self.delay,
            scope: Arc::clone(&self.scope),
            tier: None,
        }))
    }
}

struct QuotaFilter {
    handle: FilterHandle,
    delay: Duration,
    scope: Arc<dyn StatsScope>,
    tier: Option<Arc<Tier>>,
}

impl GuestFilter for QuotaFilter {
    fn decode_headers(&mut self, headers: &mut dyn HeaderMap, _end_stream: bool) -> HeadersStatus {
        if headers.get("x-user").is_none() {
            self.handle.send_local_reply(401, "missing user");
            return HeadersStatus::StopIteration;
        }
        self.tier = self.handle.route_config_as::<Tier>();
        let verdict = if self.tier.as_ref().is_some_and(|tier| tier.deny) {
            DENY
        } else {
            ALLOW
        };
        let delay = self.delay;
        match self.handle.spawn_pinned(move |guard| async move {
            tokio::time::sleep(delay).await;
            guard.post(verdict);
        }) {
            Ok(_) => HeadersStatus::StopIteration,
            Err(_) => HeadersStatus::Continue,
        }
    }

    fn on_post(&mut self, post_tag: u64) {
        let tier = self.tier.as_ref().map_or("free", |tier| tier.tier.as_str());
        if post_tag == ALLOW {
            self.scope.counter("allowed").inc();
            self.handle.set_span_tag(DECODER_SPAN, "quota.tier", tier);
            self.handle.continue_decoding();
        } else {
            self.scope.counter("denied").inc();
            self.handle.send_local_reply(429, "quota exceeded");
        }
    }
}

struct Loaded {
    runtime: Runtime,
    guest: Arc<GuestRuntime>,
    harness: BridgeHarness,
    overlays: BTreeMap<String, Arc<RouteOverlay>>,
}

impl Loaded {
    fn new(config: &BridgeConfig) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let registry = Arc::new(FilterRegistry::new());
        registry.register("quota", Arc::new(QuotaFactoryFactory));
        let guest = GuestRuntime::new(registry, runtime.handle().clone());

        let settings = FactorySettings::from_section(&config.filter).unwrap();
        let filter_proxy: Arc<dyn FilterProxy> = guest.clone();
        let config_proxy: Arc<dyn ConfigProxy> = guest.clone();
        let harness = BridgeHarness::new(settings, filter_proxy, config_proxy).unwrap();

        let overlays = config
            .routes
            .iter()
            .map(|(route, section)| {
                let name = route.clone();
                let section = section.clone();
                let proxy: Arc<dyn ConfigProxy> = guest.clone();
                let overlay = harness
                    .run(move || {
                        RouteOverlay::from_route_section(&name, &section, proxy).map(Arc::new)
                    })
                    .unwrap();
                (route.clone(), overlay)
            })
            .collect();

        Self {
            runtime,
            guest,
            harness,
            overlays,
        }
    }

    fn route(&self, name: &str) -> Arc<dyn Route> {
        MockRoute::with_overlay(Arc::clone(&self.overlays[name]))
    }

    fn unload(self) {
        let Self {
            runtime,
            guest,
            harness,
            overlays,
        } = self;
        harness.release(overlays);
        assert_eq!(guest.route_config_count(), 0);
        drop(harness);
        runtime.shutdown_timeout(Duration::from_secs(1));
    }
}

#[derive(Debug)]
struct Outcome {
    status: HeadersStatus,
    continued: usize,
    replies: Vec<(u16, String)>,
    tags: Vec<(String, String)>,
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
}

async fn drive(loaded: &Loaded, route: Option<Arc<dyn Route>>, user: Option<&str>) -> Outcome {
    let harness = &loaded.harness;
    let stream = match route {
        Some(route) => harness.open_stream_on(route),
        None => harness.open_stream(),
    };

    let mut headers = test_request_headers();
    if let Some(user) = user {
        headers.set("x-user", user);
    }
    let instance = Arc::clone(&stream.instance);
    let status = harness.run(move || instance.decode_headers(&mut headers, true));

    let decoder = Arc::clone(&stream.decoder);
    wait_until(|| decoder.continue_count() > 0 || !decoder.local_replies().is_empty()).await;

    harness.destroy(&stream);
    let outcome = Outcome {
        status,
        continued: stream.decoder.continue_count(),
        replies: stream.decoder.local_replies(),
        tags: stream.decoder.span().tags(),
    };
    harness.release(stream);
    outcome
}

fn write_config() -> (tempfile::TempDir, BridgeConfig) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tether.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    let config = BridgeConfig::load_file(&path).unwrap();
    (dir, config)
}

#[test]
fn config_file_drives_the_guest() {
    let (_dir, config) = write_config();
    let log_config = LogConfig::from_section(&config.logging).unwrap();
    // Another test may have installed the global subscriber first.
    let _ = tether_telemetry::setup_logging(&log_config);

    let loaded = Loaded::new(&config);
    assert_eq!(loaded.guest.factory_count(), 1);
    assert_eq!(loaded.guest.route_config_count(), 2);

    let gold = loaded.route("gold");
    let outcome = loaded.runtime.block_on(drive(&loaded, Some(gold), Some("alice")));
    assert_eq!(outcome.status, HeadersStatus::StopIteration);
    assert_eq!(outcome.continued, 1);
    assert!(outcome.replies.is_empty());
    assert_eq!(
        outcome.tags,
        vec![("quota.tier".to_owned(), "gold".to_owned())]
    );

    let blocked = loaded.route("blocked");
    let outcome = loaded
        .runtime
        .block_on(drive(&loaded, Some(blocked), Some("mallory")));
    assert_eq!(outcome.continued, 0);
    assert_eq!(outcome.replies, vec![(429, "quota exceeded".to_owned())]);

    let outcome = loaded.runtime.block_on(drive(&loaded, None, None));
    assert_eq!(outcome.replies, vec![(401, "missing user".to_owned())]);

    assert_eq!(loaded.harness.stats().counter_value("allowed"), Some(1));
    assert_eq!(loaded.harness.stats().counter_value("denied"), Some(1));
    assert_eq!(loaded.guest.filter_count(), 0);
    loaded.unload();
}

#[test]
fn concurrent_streams_each_get_their_verdict() {
    init_test_logging();
    let (_dir, config) = write_config();
    let loaded = Loaded::new(&config);

    let users: Vec<String> = (0..24).map(|n| format!("user-{n}")).collect();
    let outcomes = loaded.runtime.block_on(join_all(users.iter().enumerate().map(
        |(n, user)| {
            let route = if n.is_multiple_of(3) { "blocked" } else { "gold" };
            drive(&loaded, Some(loaded.route(route)), Some(user.as_str()))
        },
    )));

    let allowed = outcomes.iter().filter(|o| o.continued == 1).count();
    let denied = outcomes
        .iter()
        .filter(|o| o.replies == vec![(429, "quota exceeded".to_owned())])
        .count();
    assert_eq!(allowed, 16);
    assert_eq!(denied, 8);
    assert!(outcomes.iter().all(|o| o.status == HeadersStatus::StopIteration));
    assert_eq!(loaded.guest.filter_count(), 0);
    loaded.unload();
}

#[test]
fn teardown_mid_flight_drops_the_verdict() {
    init_test_logging();
    let (_dir, mut config) = write_config();
    config.filter.settings = serde_json::json!({ "delay_ms": 50 });
    let loaded = Loaded::new(&config);

    let stream = loaded.harness.open_stream_on(loaded.route("gold"));
    let mut headers = test_request_headers();
    headers.set("x-user", "alice");
    let instance = Arc::clone(&stream.instance);
    let status = loaded
        .harness
        .run(move || instance.decode_headers(&mut headers, true));
    assert_eq!(status, HeadersStatus::StopIteration);
    assert_eq!(stream.instance.pins(), 2);

    loaded.harness.destroy(&stream);
    loaded.harness.dispatcher().flush();
    assert_eq!(stream.decoder.continue_count(), 0);
    assert!(stream.decoder.local_replies().is_empty());
    assert_eq!(loaded.harness.stats().counter_value("allowed"), None);
    assert_eq!(loaded.guest.filter_count(), 0);

    loaded.harness.release(stream);
    loaded.unload();
}

#[test]
fn malformed_route_settings_are_rejected() {
    init_test_logging();
    let (_dir, mut config) = write_config();
    config.routes.remove("blocked");
    let loaded = Loaded::new(&config);

    let rejected = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        loaded.harness.overlay(vec![(
            "quota".to_owned(),
            br#"{"not_a_tier": 1}"#.to_vec(),
        )])
    }));
    assert!(rejected.is_err());
    assert_eq!(loaded.guest.route_config_count(), 1);
    loaded.unload();
}
