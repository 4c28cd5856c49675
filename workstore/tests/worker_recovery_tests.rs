
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use store_helper::{PanickyBackend, init_tracing, wait_for};
use workstore::bridge::PendingCalls;
use workstore::{
    AsyncBridge, MemoryBackend, Method, Store, StoreConfig, StoreError, Supervisor, SyncBridge,
    WorkerState,
};

#[tokio::test]
async fn test_store_recovers_after_worker_exit() {
    init_tracing();
    let backend = MemoryBackend::new();
    let store = Store::with_backend(
        StoreConfig::new("recovery").with_save_throttle_ms(10_000),
        Arc::new(backend.clone()),
    )
    .unwrap();
    store.init().await.unwrap();

    assert_eq!(store.kill_worker().unwrap(), 1);
    store.set("a", json!(1)).unwrap();

    // A save racing the dying worker may be rejected; a later one lands
    let mut saved = false;
    for _ in 0..50 {
        match store.save().await {
            Ok(()) => {
                saved = true;
                break;
            }
            Err(StoreError::WorkerFault(_)) => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("Unexpected error: {}", e),
        }
    }

    assert!(saved);
    assert_eq!(backend.snapshot().get("a"), Some(&json!(1)));
    assert_eq!(backend.snapshot().len(), 1);
    assert!(store.stats().worker_generation >= 2);
}

#[tokio::test]
async fn test_panicking_backend_rejects_call_and_respawns() {
    init_tracing();
    let bridge = AsyncBridge::spawn(PanickyBackend::new(MemoryBackend::new())).unwrap();

    bridge
        .call(Method::Set, vec![json!("safe"), json!(1)])
        .await
        .unwrap();

    let result = bridge.call(Method::Get, vec![json!("boom")]).await;
    assert!(matches!(result, Err(StoreError::WorkerFault(_))));
    assert_eq!(bridge.in_flight(), 0);

    assert!(wait_for(|| bridge.supervisor().generation() == 2));
    assert!(wait_for(|| bridge.supervisor().state() == WorkerState::Running));

    // Same backend configuration, data written by the dead worker survives
    let value = bridge.call(Method::Get, vec![json!("safe")]).await.unwrap();
    assert_eq!(value, json!(1));
    assert_eq!(bridge.supervisor().respawns(), 1);
}

#[tokio::test]
async fn test_calls_queued_behind_crash_are_rejected() {
    init_tracing();
    let bridge = AsyncBridge::spawn(PanickyBackend::new(MemoryBackend::new())).unwrap();

    let crash = bridge.dispatch(Method::Get, vec![json!("boom")]).unwrap();
    let queued = bridge.dispatch(Method::Load, vec![]).unwrap();

    assert!(matches!(crash.await, Err(StoreError::WorkerFault(_))));
    assert!(matches!(queued.await, Err(StoreError::WorkerFault(_))));
}

#[test]
fn test_sync_call_fails_cleanly_on_crash() {
    init_tracing();
    let supervisor = Arc::new(
        Supervisor::spawn(
            PanickyBackend::new(MemoryBackend::new()),
            Arc::new(PendingCalls::new()),
        )
        .unwrap(),
    );
    let sync = SyncBridge::new(Arc::clone(&supervisor), 64 * 1024);

    let result = sync.call(Method::Get, vec![json!("boom")]);
    assert!(matches!(result, Err(StoreError::WorkerFault(_))));

    assert!(wait_for(|| supervisor.generation() == 2));
    assert_eq!(sync.call(Method::Load, vec![]).unwrap(), json!({}));
}

#[tokio::test]
async fn test_destroy_with_dying_worker_succeeds() {
    init_tracing();
    let store = Store::with_backend(
        StoreConfig::new("gone"),
        Arc::new(MemoryBackend::new()),
    )
    .unwrap();
    store.init().await.unwrap();
    store.set("x", json!(1)).unwrap();

    store.kill_worker().unwrap();
    store.destroy().await.unwrap();

    assert_eq!(store.worker_state(), WorkerState::Terminated);
    assert!(matches!(store.kill_worker(), Err(StoreError::Terminated)));
}
