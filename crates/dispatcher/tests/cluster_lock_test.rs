mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::Harness;
use taskfarm_core::models::{ClusterLockSpec, LockStatus};
use taskfarm_dispatcher::ClusterLockExecutor;

#[tokio::test]
async fn test_inline_releases_lock_after_body() {
    let harness = Harness::new().await;
    let spec = ClusterLockSpec::soft_lock("reindex");

    let output = harness.locks.inline(&spec, || async { 42 }).await.unwrap();
    assert_eq!(output, Some(42));
    assert!(!harness.locks.is_locked("reindex").await.unwrap());
}

#[tokio::test]
async fn test_hold_till_timeout_keeps_lock() {
    let harness = Harness::new().await;
    let spec = ClusterLockSpec::soft_lock("reindex").with_hold_till_timeout();

    assert!(harness.locks.inline(&spec, || async {}).await.unwrap().is_some());
    assert!(harness.locks.is_locked("reindex").await.unwrap());

    let other = ClusterLockExecutor::new(harness.stores.cluster_locks.clone(), "replica-b");
    assert!(other
        .inline(&ClusterLockSpec::soft_lock("reindex"), || async {})
        .await
        .unwrap()
        .is_none());

    let lock = harness.stores.cluster_locks.get("reindex").await.unwrap().unwrap();
    assert_eq!(lock.host, "replica-a");
}

#[tokio::test]
async fn test_combine_reruns_body_on_holder() {
    let harness = Harness::new().await;
    let spec = ClusterLockSpec::soft_lock("sync").with_combine();
    let runs = Arc::new(AtomicUsize::new(0));

    let output = {
        let runs = runs.clone();
        let repo = harness.stores.cluster_locks.clone();
        let spec = spec.clone();
        harness
            .locks
            .inline(&spec.clone(), move || {
                let runs = runs.clone();
                let repo = repo.clone();
                let spec = spec.clone();
                async move {
                    // 首次执行期间另一个节点请求合并
                    if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                        let status = repo.lock(&spec, "replica-b").await.unwrap();
                        assert_eq!(status, LockStatus::Combined);
                    }
                }
            })
            .await
            .unwrap()
    };

    assert!(output.is_some());
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(!harness.locks.is_locked("sync").await.unwrap());
}

#[tokio::test]
async fn test_expired_locks_are_cleared() {
    let harness = Harness::new().await;
    let spec = ClusterLockSpec::soft_lock("stale")
        .with_timeout(1)
        .with_hold_till_timeout();
    harness.locks.inline(&spec, || async {}).await.unwrap();

    assert_eq!(harness.locks.clear_expired().await, 0);
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    assert_eq!(harness.locks.clear_expired().await, 1);
    assert!(!harness.locks.is_locked("stale").await.unwrap());
}
