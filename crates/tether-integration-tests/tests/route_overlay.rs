//! Per-route overlays and route-config tag resolution.

mod common;

use std::sync::Arc;

use common::MockBridge;
use tether_bridge::host::Route;
use tether_bridge::{ConfigProxy, RouteOverlay};
use tether_config::BridgeConfig;
use tether_test::MockRoute;

fn entries(names: &[&str]) -> Vec<(String, Vec<u8>)> {
    names
        .iter()
        .map(|name| ((*name).to_owned(), format!("{{\"route\":\"{name}\"}}").into_bytes()))
        .collect()
}

#[test]
fn lookup_by_filter_name() {
    let bridge = MockBridge::new();
    let overlay = bridge.harness.overlay(entries(&["security", "ratelimit"]));

    let security = overlay.lookup("security");
    let ratelimit = overlay.lookup("ratelimit");
    assert_ne!(security, 0);
    assert_ne!(ratelimit, 0);
    assert_ne!(security, ratelimit);
    assert_eq!(overlay.lookup("missing"), 0);
    assert_eq!(overlay.len(), 2);

    bridge.harness.release(overlay);
    let mut destroyed = bridge.config.destroyed_route_configs();
    destroyed.sort_unstable();
    let mut created = vec![security, ratelimit];
    created.sort_unstable();
    assert_eq!(destroyed, created);
}

#[test]
fn empty_overlay_resolves_nothing() {
    let bridge = MockBridge::new();
    let overlay = bridge.harness.overlay(Vec::new());
    assert!(overlay.is_empty());
    assert_eq!(overlay.lookup("security"), 0);
    bridge.harness.release(overlay);
    assert!(bridge.config.destroyed_route_configs().is_empty());
}

#[test]
fn stream_resolves_its_route_config() {
    let bridge = MockBridge::new();
    let overlay = bridge.harness.overlay(entries(&["ratelimit", "security"]));
    let expected = overlay.lookup("security");

    let route: Arc<dyn Route> = MockRoute::with_overlay(Arc::clone(&overlay));
    let stream = bridge.harness.open_stream_on(route);
    assert_eq!(stream.instance.resolve_route_config_tag(), expected);

    bridge.harness.destroy(&stream);
    assert_eq!(stream.instance.resolve_route_config_tag(), 0);
    bridge.harness.release(stream);
    bridge.harness.release(overlay);
}

#[test]
fn routes_without_config_resolve_to_zero() {
    let bridge = MockBridge::new();
    let overlay = bridge.harness.overlay(entries(&["ratelimit"]));
    let routes: Vec<Arc<dyn Route>> = vec![
        MockRoute::empty(),
        MockRoute::without_entry(),
        MockRoute::with_overlay(Arc::clone(&overlay)),
    ];
    for route in routes {
        let stream = bridge.harness.open_stream_on(route);
        assert_eq!(stream.instance.resolve_route_config_tag(), 0);
        bridge.harness.destroy(&stream);
        bridge.harness.release(stream);
    }

    let stream = bridge.harness.open_stream();
    assert_eq!(stream.instance.resolve_route_config_tag(), 0);
    bridge.harness.destroy(&stream);
    bridge.harness.release(overlay);
}

#[test]
fn overlay_from_a_loaded_config() {
    let bridge = MockBridge::new();
    let config = BridgeConfig::from_toml_str(
        r#"
        [filter]
        name = "security"

        [routes.admin.filters]
        security = { realm = "admin", strict = true }
        ratelimit = { per_second = 10 }

        [routes.public]
        "#,
    )
    .unwrap();

    let admin = config.routes["admin"].clone();
    let proxy: Arc<dyn ConfigProxy> = bridge.config.clone();
    let overlay = bridge
        .harness
        .run(move || RouteOverlay::from_route_section("admin", &admin, proxy).map(Arc::new))
        .unwrap();

    let created = bridge.config.route_configs();
    assert_eq!(created.len(), 2);
    let (tag, _, settings) = created
        .iter()
        .find(|(_, name, _)| name == "security")
        .unwrap();
    assert_eq!(overlay.lookup("security"), *tag);
    let settings: serde_json::Value = serde_json::from_slice(settings).unwrap();
    assert_eq!(settings["realm"], "admin");
    assert_eq!(settings["strict"], true);
    bridge.harness.release(overlay);

    let public = config.routes["public"].clone();
    let proxy: Arc<dyn ConfigProxy> = bridge.config.clone();
    let empty = bridge
        .harness
        .run(move || RouteOverlay::from_route_section("public", &public, proxy).map(Arc::new))
        .unwrap();
    assert!(empty.is_empty());
    bridge.harness.release(empty);
}

#[test]
#[should_panic(expected = "guest rejected route config for filter 'security'")]
fn rejected_route_config_aborts() {
    let bridge = MockBridge::new();
    bridge.config.reject_route_configs();
    let _ = bridge.harness.overlay(entries(&["security"]));
}
