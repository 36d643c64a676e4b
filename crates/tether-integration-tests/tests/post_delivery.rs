//! Guest posts: exactly-once delivery on the dispatcher, dropped after
//! teardown.

mod common;

use std::thread;
use std::time::Duration;

use common::{MockBridge, on_other_thread};
use tether_bridge::LifecycleState;
use tether_test::ProxyCall;

#[test]
fn post_from_a_worker_is_delivered_once() {
    let bridge = MockBridge::new();
    let stream = bridge.harness.open_stream();
    let tag = stream.instance.tag();

    let instance = stream.instance.clone();
    instance.pin();
    on_other_thread(move || {
        instance.post(7);
        instance.unpin();
    });
    bridge.harness.dispatcher().flush();

    assert_eq!(bridge.proxy.posts(), vec![(tag, 7)]);
    bridge.harness.destroy(&stream);
    bridge.harness.dispatcher().flush();
    assert_eq!(bridge.proxy.posts(), vec![(tag, 7)]);
}

#[test]
fn concurrent_posts_each_arrive_once() {
    const WORKERS: u64 = 16;

    let bridge = MockBridge::new();
    let stream = bridge.harness.open_stream();
    let tag = stream.instance.tag();

    let workers: Vec<_> = (1..=WORKERS)
        .map(|post_tag| {
            stream.instance.pin();
            let instance = stream.instance.clone();
            thread::spawn(move || {
                instance.post(post_tag);
                instance.unpin();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    bridge.harness.dispatcher().flush();

    let mut posts = bridge.proxy.posts();
    posts.sort_unstable();
    let expected: Vec<_> = (1..=WORKERS).map(|post_tag| (tag, post_tag)).collect();
    assert_eq!(posts, expected);
    bridge.harness.destroy(&stream);
}

#[test]
fn post_queued_behind_teardown_is_dropped() {
    let bridge = MockBridge::new();
    let stream = bridge.harness.open_stream();
    let tag = stream.instance.tag();
    stream.instance.pin();

    // The dispatcher blocks inside on_destroy while we hold a pin, so the
    // post lands in its queue behind the teardown.
    let dispatcher = bridge.harness.dispatcher().clone();
    let instance = stream.instance.clone();
    let destroyer = thread::spawn(move || dispatcher.run(move || instance.on_destroy()));
    while stream.instance.state() != LifecycleState::Destroying {
        thread::sleep(Duration::from_millis(5));
    }

    stream.instance.post(42);
    stream.instance.unpin();
    destroyer.join().unwrap();
    bridge.harness.dispatcher().flush();

    assert!(bridge.proxy.posts().is_empty());
    assert_eq!(
        bridge.proxy.calls().last(),
        Some(&ProxyCall::OnDestroy { tag })
    );
}

#[test]
fn nothing_reaches_the_guest_after_on_destroy() {
    let bridge = MockBridge::new();
    let stream = bridge.harness.open_stream();

    for round in 0..4_u64 {
        stream.instance.pin();
        let instance = stream.instance.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(round.saturating_mul(10)));
            instance.post(round);
            instance.unpin();
        });
    }
    bridge.harness.destroy(&stream);
    bridge.harness.dispatcher().flush();

    let calls = bridge.proxy.calls();
    let destroyed_at = calls
        .iter()
        .position(|call| matches!(call, ProxyCall::OnDestroy { .. }))
        .unwrap();
    assert!(
        calls[destroyed_at..]
            .iter()
            .all(|call| matches!(call, ProxyCall::OnDestroy { .. }))
    );
}

#[test]
#[should_panic(expected = "after teardown")]
fn post_after_teardown_aborts() {
    let bridge = MockBridge::new();
    let stream = bridge.harness.open_stream();
    bridge.harness.destroy(&stream);
    stream.instance.post(1);
}

#[test]
#[should_panic(expected = "before decoder callbacks were bound")]
fn post_before_binding_aborts() {
    let bridge = MockBridge::new();
    let factory = bridge.harness.factory();
    let instance = bridge.harness.run(move || factory.create_filter());
    instance.post(1);
}
