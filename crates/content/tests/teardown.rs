//! End-to-end bookkeeping and teardown behaviour of the registry

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use content::{cleanup, ResourceRegistry, UsageSnapshot};
use dom::{
    handler, observer_callback, Document, DomError, EventTarget, Handler, ListenerOptions,
    NodeId, Observer, ObserverCallback, ObserverFactory, ObserverKind, ObserverOptions,
};

/// Target whose detach always fails
struct StubbornTarget {
    attached: AtomicUsize,
}

impl EventTarget for StubbornTarget {
    fn target_id(&self) -> NodeId {
        404
    }

    fn add_event_listener(&self, _kind: &str, _handler: Handler, _options: &ListenerOptions) {
        self.attached.fetch_add(1, Ordering::SeqCst);
    }

    fn remove_event_listener(
        &self,
        kind: &str,
        _handler: &Handler,
        _options: &ListenerOptions,
    ) -> dom::Result<()> {
        Err(DomError::ListenerDetach {
            target: 404,
            kind: kind.to_string(),
            reason: "target already destroyed".to_string(),
        })
    }
}

/// Observer whose disconnect panics, and a factory producing it
struct ExplodingObserver;

impl Observer for ExplodingObserver {
    fn kind(&self) -> ObserverKind {
        ObserverKind::Resize
    }

    fn observe(&self, _target: NodeId) -> dom::Result<()> {
        Ok(())
    }

    fn unobserve(&self, _target: NodeId) {}

    fn disconnect(&self) -> dom::Result<()> {
        panic!("disconnect exploded");
    }

    fn is_connected(&self) -> bool {
        true
    }
}

struct ExplodingFactory;

impl ObserverFactory for ExplodingFactory {
    fn create(
        &self,
        _kind: ObserverKind,
        _callback: ObserverCallback,
        _options: ObserverOptions,
    ) -> dom::Result<Arc<dyn Observer>> {
        Ok(Arc::new(ExplodingObserver))
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test(start_paused = true)]
async fn test_usage_snapshot_tracks_live_registrations() {
    init_tracing();
    let doc = Arc::new(Document::new("https://example.com").unwrap());
    let registry = ResourceRegistry::new(doc.clone());
    let a = doc.create_element("a");
    let b = doc.create_element("b");

    registry.register_listener(a.clone(), "click", handler(|_| {}), ListenerOptions::default());
    registry.register_listener(a.clone(), "keydown", handler(|_| {}), ListenerOptions::default());
    registry.register_listener(b.clone(), "click", handler(|_| {}), ListenerOptions::default());
    registry
        .create_observer(
            ObserverKind::Mutation,
            observer_callback(|_| {}),
            ObserverOptions::child_list_subtree(),
        )
        .unwrap();
    registry.schedule_once(|| {}, Duration::from_secs(10));
    registry.schedule_once(|| {}, Duration::from_secs(20));
    registry.schedule_repeating(|| {}, Duration::from_secs(1));
    registry.add_cleanup(cleanup(|| Ok(())));

    assert_eq!(
        registry.usage_snapshot(),
        UsageSnapshot {
            listener_owners: 2,
            observers: 1,
            timeouts: 2,
            intervals: 1,
            cleanups: 1,
        }
    );

    let report = registry.release_all();
    assert_eq!(report.total(), 8);
    assert_eq!(report.failures, 0);
    assert_eq!(registry.usage_snapshot(), UsageSnapshot::default());
    assert_eq!(a.total_listeners(), 0);
    assert_eq!(b.total_listeners(), 0);
}

#[tokio::test]
async fn test_teardown_survives_failing_items() {
    init_tracing();
    let registry = ResourceRegistry::new(Arc::new(ExplodingFactory));
    let doc = Document::new("https://example.com").unwrap();
    let good = doc.create_element("div");
    let stubborn = Arc::new(StubbornTarget {
        attached: AtomicUsize::new(0),
    });
    let ran = Arc::new(AtomicUsize::new(0));

    registry.register_listener(stubborn.clone(), "click", handler(|_| {}), ListenerOptions::default());
    registry.register_listener(good.clone(), "click", handler(|_| {}), ListenerOptions::default());
    assert_eq!(stubborn.attached.load(Ordering::SeqCst), 1);

    registry
        .create_observer(ObserverKind::Resize, observer_callback(|_| {}), ObserverOptions::default())
        .unwrap();

    registry.add_cleanup(cleanup(|| Err("cleanup failed".into())));
    let ran_ref = ran.clone();
    registry.add_cleanup(cleanup(move || {
        ran_ref.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    registry.add_cleanup(cleanup(|| panic!("cleanup panicked")));
    let ran_ref = ran.clone();
    registry.add_cleanup(cleanup(move || {
        ran_ref.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));

    let report = registry.release_all();
    assert_eq!(report.listeners, 2);
    assert_eq!(report.observers, 1);
    assert_eq!(report.cleanups, 4);
    // stubborn detach, exploding disconnect, failing cleanup, panicking cleanup
    assert_eq!(report.failures, 4);

    assert_eq!(ran.load(Ordering::SeqCst), 2);
    assert_eq!(good.total_listeners(), 0);
    assert!(registry.usage_snapshot().is_empty());

    // Second call: nothing left, nothing thrown
    let again = registry.release_all();
    assert_eq!(again.total(), 0);
    assert_eq!(again.failures, 0);
    assert_eq!(ran.load(Ordering::SeqCst), 2);
}

#[test]
fn test_listener_churn_leaves_no_residue() {
    let doc = Arc::new(Document::new("https://example.com").unwrap());
    let registry = ResourceRegistry::new(doc.clone());
    let nodes: Vec<_> = (0..3).map(|_| doc.create_element("li")).collect();
    let kinds = ["click", "focus", "blur"];

    let mut registered = Vec::new();
    for round in 0..4 {
        for (i, node) in nodes.iter().enumerate() {
            let kind = kinds[(i + round) % kinds.len()];
            let h = handler(|_| {});
            let wrapped = registry.register_listener(node.clone(), kind, h.clone(), ListenerOptions::default());
            // Alternate between removing by original and by wrapped handler
            let key = if round % 2 == 0 { h } else { wrapped };
            registered.push((node.clone(), kind, key));
        }
    }
    assert_eq!(registry.usage_snapshot().listener_owners, 3);

    // Interleave removals: odd positions first, then even
    let (odd, even): (Vec<_>, Vec<_>) = registered
        .into_iter()
        .enumerate()
        .partition(|(i, _)| i % 2 == 1);
    for (_, (node, kind, key)) in odd.into_iter().chain(even) {
        assert!(registry.unregister_listener(&*node, kind, &key));
    }

    assert_eq!(registry.usage_snapshot().listener_owners, 0);
    for node in &nodes {
        assert_eq!(node.total_listeners(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_fired_timeouts_do_not_accumulate() {
    let doc = Arc::new(Document::new("https://example.com").unwrap());
    let registry = ResourceRegistry::new(doc);
    let fired = Arc::new(AtomicUsize::new(0));

    for i in 0..50u64 {
        let fired = fired.clone();
        registry.schedule_once(
            move || {
                fired.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(10 + i),
        );
    }
    let interval = registry.schedule_repeating(|| {}, Duration::from_millis(5));
    assert_eq!(registry.usage_snapshot().timeouts, 50);

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(fired.load(Ordering::SeqCst), 50);
    assert_eq!(registry.usage_snapshot().timeouts, 0);
    assert_eq!(registry.usage_snapshot().intervals, 1);

    assert!(registry.cancel_repeating(interval));
    assert!(registry.usage_snapshot().is_empty());
}
