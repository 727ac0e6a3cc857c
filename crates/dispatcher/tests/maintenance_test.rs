mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, ANALYST};
use taskfarm_core::{
    config::MaintenanceConfig,
    models::{now_millis, AnalystState, ClusterLockSpec, JobState, TaskState},
};
use taskfarm_dispatcher::{maintenance::MAINTENANCE_LOCK, ClusterLockExecutor, MaintenanceReport};
use tokio::sync::broadcast;
use uuid::Uuid;

/// 所有超时为0，任何早于当前时刻的心跳都视为过期
fn eager_config() -> MaintenanceConfig {
    MaintenanceConfig {
        initial_delay_max_millis: 0,
        interval_millis: 10,
        orphan_task_timeout_seconds: 0,
        analyst_down_timeout_seconds: 0,
        analyst_remove_timeout_seconds: 3600,
        archive_jobs_after_days: 1,
        ..Default::default()
    }
}

async fn tick() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test]
async fn test_orphaned_tasks_are_retried() {
    let harness = Harness::new().await;
    let job = harness.create_job(Uuid::now_v7(), 2).await;
    let running = harness.run_task(ANALYST).await;
    let queued = harness.dispatcher.get_next(ANALYST, 1).await.unwrap().remove(0);
    tick().await;

    let maintenance = harness.maintenance(eager_config());
    assert_eq!(maintenance.reclaim_orphans().await.unwrap(), 2);

    for id in [running.id, queued.id] {
        assert_eq!(
            harness.lifecycle.get_task(id).await.unwrap().state,
            TaskState::Waiting
        );
    }
    let counts = harness.stores.jobs.get_counts(job.id).await.unwrap();
    assert_eq!(counts.waiting, 2);

    let killed = harness.client.killed().await;
    assert_eq!(killed.len(), 2);
}

#[tokio::test]
async fn test_orphan_finished_after_scan_is_not_reset() {
    let harness = Harness::new().await;
    let job = harness.create_job(Uuid::now_v7(), 1).await;
    let task = harness.run_task(ANALYST).await;
    tick().await;

    // 扫描到孤儿之后、回收之前，Analyst报告了成功
    let orphans = harness.stores.tasks.get_orphans(now_millis(), 10).await.unwrap();
    assert_eq!(orphans.len(), 1);
    assert!(harness.lifecycle.stop_task(task.id, 0, false).await.unwrap());

    assert!(!harness
        .lifecycle
        .reclaim_orphan(&orphans[0], "orphaned")
        .await
        .unwrap());
    assert_eq!(
        harness.lifecycle.get_task(task.id).await.unwrap().state,
        TaskState::Success
    );
    assert_eq!(
        harness.lifecycle.get_job(job.id).await.unwrap().state,
        JobState::Success
    );
    assert!(harness.client.killed().await.is_empty());
}

#[tokio::test]
async fn test_recent_tasks_are_not_orphans() {
    let harness = Harness::new().await;
    harness.create_job(Uuid::now_v7(), 1).await;
    harness.run_task(ANALYST).await;

    let maintenance = harness.maintenance(MaintenanceConfig::default());
    assert_eq!(maintenance.reclaim_orphans().await.unwrap(), 0);
    assert!(harness.client.killed().await.is_empty());
}

#[tokio::test]
async fn test_silent_analysts_are_marked_down() {
    let harness = Harness::new().await;
    harness.register_analyst(ANALYST).await;
    tick().await;

    let report = harness
        .maintenance(eager_config())
        .run_once()
        .await
        .unwrap()
        .expect("lock acquired");
    assert_eq!(report.analysts_marked_down, 1);
    assert_eq!(report.analysts_removed, 0);

    let analyst = harness.registry.get(ANALYST).await.unwrap();
    assert_eq!(analyst.state, AnalystState::Down);

    // 再次注册即恢复 Up
    harness.register_analyst(ANALYST).await;
    let analyst = harness.registry.get(ANALYST).await.unwrap();
    assert_eq!(analyst.state, AnalystState::Up);
}

#[tokio::test]
async fn test_long_gone_analysts_are_removed() {
    let harness = Harness::new().await;
    harness.register_analyst(ANALYST).await;
    tick().await;

    let config = MaintenanceConfig {
        analyst_remove_timeout_seconds: 0,
        ..eager_config()
    };
    let maintenance = harness.maintenance(config);

    // 同一轮内先标记为Down，再删除
    let report = maintenance.run_once().await.unwrap().unwrap();
    assert_eq!(report.analysts_marked_down, 1);
    assert_eq!(report.analysts_removed, 1);

    assert!(!harness.registry.exists(ANALYST).await.unwrap());
}

#[tokio::test]
async fn test_expired_jobs_are_archived() {
    let harness = Harness::new().await;
    let finished = harness.create_job(Uuid::now_v7(), 1).await;
    let task = harness.run_task(ANALYST).await;
    harness.lifecycle.stop_task(task.id, 0, false).await.unwrap();
    let active = harness.create_job(Uuid::now_v7(), 1).await;

    let maintenance = harness.maintenance(eager_config());
    assert_eq!(maintenance.archive_expired_jobs().await.unwrap(), 0);

    let config = MaintenanceConfig {
        archive_jobs_after_days: 0,
        ..eager_config()
    };
    tick().await;
    let maintenance = harness.maintenance(config);
    assert_eq!(maintenance.archive_expired_jobs().await.unwrap(), 1);

    assert!(harness.lifecycle.get_job(finished.id).await.is_err());
    assert_eq!(
        harness.lifecycle.get_job(active.id).await.unwrap().state,
        JobState::InProgress
    );
}

#[tokio::test]
async fn test_paused_jobs_resume_when_expired() {
    let harness = Harness::new().await;
    let expiring = harness.create_job(Uuid::now_v7(), 1).await;
    let indefinite = harness.create_job(Uuid::now_v7(), 1).await;

    harness
        .stores
        .jobs
        .set_paused(expiring.id, true, now_millis() - 1)
        .await
        .unwrap();
    harness.lifecycle.pause_job(indefinite.id, None).await.unwrap();

    let maintenance = harness.maintenance(eager_config());
    assert_eq!(maintenance.resume_paused_jobs().await.unwrap(), 1);

    assert!(!harness.lifecycle.get_job(expiring.id).await.unwrap().paused);
    assert!(harness.lifecycle.get_job(indefinite.id).await.unwrap().paused);
}

#[tokio::test]
async fn test_run_once_skips_when_other_replica_holds_lock() {
    let harness = Harness::new().await;
    let other = ClusterLockExecutor::new(harness.stores.cluster_locks.clone(), "replica-b");
    let held = other
        .inline(
            &ClusterLockSpec::soft_lock(MAINTENANCE_LOCK).with_hold_till_timeout(),
            || async {},
        )
        .await
        .unwrap();
    assert!(held.is_some());

    let maintenance = harness.maintenance(eager_config());
    assert_eq!(maintenance.run_once().await.unwrap(), None);

    other.unlock(MAINTENANCE_LOCK).await.unwrap();
    assert_eq!(
        maintenance.run_once().await.unwrap(),
        Some(MaintenanceReport::default())
    );
    assert!(!harness.locks.is_locked(MAINTENANCE_LOCK).await.unwrap());
}

#[tokio::test]
async fn test_loop_runs_until_shutdown() {
    let harness = Harness::new().await;
    harness.create_job(Uuid::now_v7(), 1).await;
    let task = harness.run_task(ANALYST).await;
    tick().await;

    let maintenance = Arc::new(harness.maintenance(eager_config()));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = {
        let maintenance = maintenance.clone();
        tokio::spawn(async move { maintenance.start(shutdown_rx).await })
    };

    let reclaimed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let task = harness.lifecycle.get_task(task.id).await.unwrap();
            if task.state == TaskState::Waiting {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reclaimed.is_ok(), "orphan was not reclaimed by the loop");
    assert!(maintenance.is_running().await);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop exits on shutdown")
        .unwrap()
        .unwrap();
    assert!(!maintenance.is_running().await);
}
