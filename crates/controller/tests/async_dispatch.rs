#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use vigil_controller::Controller;
use vigil_core::{Config, ConfigEvent, ConfigMeta, ConfigStore, EventKind, GroupVersionKind, Schema, Schemas};
use vigil_store::MemoryStore;

fn foo() -> GroupVersionKind { GroupVersionKind::new("", "v1", "Foo") }

fn obj(name: &str, spec: serde_json::Value) -> Config {
    Config::new(ConfigMeta::new(foo(), name, "default"), spec)
}

async fn wait_for(seen: &Arc<Mutex<Vec<(EventKind, String)>>>, n: usize) {
    for _ in 0..200 {
        if seen.lock().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queued_events_arrive_in_mutation_order() {
    let store = Arc::new(MemoryStore::new(Schemas::new().add(Schema::namespaced(foo()))));
    let c = Arc::new(Controller::new(store));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    c.register_event_handler(foo(), Arc::new(move |e: &ConfigEvent| s.lock().push((e.kind, e.new.meta.name.clone()))));

    c.create(&obj("a", serde_json::json!({"v": 1}))).unwrap();
    c.update(&obj("a", serde_json::json!({"v": 2}))).unwrap();
    c.create(&obj("b", serde_json::json!({}))).unwrap();
    c.delete(&foo(), "a", "default", None).unwrap();
    assert!(seen.lock().is_empty(), "queued mode does not deliver before run");

    let stop = CancellationToken::new();
    let runner = tokio::spawn({
        let c = Arc::clone(&c);
        let stop = stop.clone();
        async move { c.run(stop).await }
    });
    wait_for(&seen, 4).await;
    assert_eq!(
        *seen.lock(),
        vec![
            (EventKind::Add, "a".to_string()),
            (EventKind::Update, "a".to_string()),
            (EventKind::Add, "b".to_string()),
            (EventKind::Delete, "a".to_string()),
        ]
    );

    // Failures still schedule nothing while the loop is live.
    assert!(c.delete(&foo(), "a", "default", None).is_err());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(seen.lock().len(), 4);

    stop.cancel();
    tokio::time::timeout(Duration::from_secs(1), runner).await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_blocks_until_stop_in_both_modes() {
    for sync in [false, true] {
        let store = Arc::new(MemoryStore::new(Schemas::new().add(Schema::namespaced(foo()))));
        let c = Arc::new(if sync { Controller::new_sync(store) } else { Controller::new(store) });
        let stop = CancellationToken::new();
        let runner = tokio::spawn({
            let c = Arc::clone(&c);
            let stop = stop.clone();
            async move { c.run(stop).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!runner.is_finished(), "run returned before stop (sync={})", sync);
        stop.cancel();
        tokio::time::timeout(Duration::from_secs(1), runner).await.unwrap().unwrap();
    }
}
