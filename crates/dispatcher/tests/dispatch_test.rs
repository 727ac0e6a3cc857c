mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{job_spec, Harness, RecordingAnalystClient, ANALYST};
use taskfarm_core::config::{DispatcherConfig, MaintenanceConfig};
use taskfarm_core::models::{now_millis, JobPriority, LockState, TaskState};
use uuid::Uuid;

#[tokio::test]
async fn test_get_next_queues_tasks_for_endpoint() {
    let harness = Harness::new().await;
    harness.register_analyst(ANALYST).await;
    let job = harness.create_job(Uuid::now_v7(), 3).await;

    let tasks = harness.dispatcher.get_next(ANALYST, 2).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.state == TaskState::Queued));
    assert!(tasks.iter().all(|t| t.host.as_deref() == Some(ANALYST)));

    let counts = harness.stores.jobs.get_counts(job.id).await.unwrap();
    assert_eq!(counts.queued, 2);
    assert_eq!(counts.waiting, 1);

    let analyst = harness.registry.get(ANALYST).await.unwrap();
    assert!(analyst.task_id.is_some());
}

#[tokio::test]
async fn test_locked_analyst_gets_nothing() {
    let harness = Harness::new().await;
    harness.register_analyst(ANALYST).await;
    harness.create_job(Uuid::now_v7(), 2).await;

    harness
        .registry
        .set_lock_state(ANALYST, LockState::Locked)
        .await
        .unwrap();
    assert!(harness.dispatcher.get_next(ANALYST, 5).await.unwrap().is_empty());

    harness
        .registry
        .set_lock_state(ANALYST, LockState::Unlocked)
        .await
        .unwrap();
    assert_eq!(harness.dispatcher.get_next(ANALYST, 5).await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_queue_of_same_task_has_one_winner() {
    let harness = Arc::new(Harness::new().await);
    let job = harness.create_job(Uuid::now_v7(), 1).await;
    let task_id = harness.tasks_of(job.id).await[0].id;

    let mut handles = Vec::new();
    for i in 0..8 {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            let endpoint = format!("http://analyst-{i}:5000");
            harness.stores.tasks.queue(task_id, &endpoint).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let counts = harness.stores.jobs.get_counts(job.id).await.unwrap();
    assert_eq!(counts.queued, 1);
    assert_eq!(counts.waiting, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatch_never_double_queues() {
    let harness = Arc::new(Harness::new().await);
    let job = harness.create_job(Uuid::now_v7(), 8).await;

    let mut handles = Vec::new();
    for i in 0..4 {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            let endpoint = format!("http://analyst-{i}:5000");
            harness.dispatcher.get_next(&endpoint, 4).await.unwrap()
        }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for task in handle.await.unwrap() {
            assert!(seen.insert(task.id), "task {} dispatched twice", task.id);
            total += 1;
        }
    }
    assert!(total > 0);
    let counts = harness.stores.jobs.get_counts(job.id).await.unwrap();
    assert_eq!(counts.queued, total);
    assert_eq!(counts.sum(), counts.total);
}

#[tokio::test]
async fn test_queue_rejects_task_of_cancelled_or_paused_job() {
    let harness = Harness::new().await;
    let project = Uuid::now_v7();

    let cancelled = harness.create_job(project, 1).await;
    let cancelled_task = harness.tasks_of(cancelled.id).await[0].id;
    assert!(harness.lifecycle.cancel_job(cancelled.id).await.unwrap());
    assert!(!harness.stores.tasks.queue(cancelled_task, ANALYST).await.unwrap());

    let paused = harness.create_job(project, 1).await;
    let paused_task = harness.tasks_of(paused.id).await[0].id;
    assert!(harness.lifecycle.pause_job(paused.id, None).await.unwrap());
    assert!(!harness.stores.tasks.queue(paused_task, ANALYST).await.unwrap());

    for task_id in [cancelled_task, paused_task] {
        assert_eq!(
            harness.lifecycle.get_task(task_id).await.unwrap().state,
            TaskState::Waiting
        );
    }

    assert!(harness.lifecycle.resume_job(paused.id).await.unwrap());
    assert!(harness.stores.tasks.queue(paused_task, ANALYST).await.unwrap());
}

#[tokio::test]
async fn test_interactive_jobs_dispatch_first() {
    let harness = Harness::new().await;
    let project = Uuid::now_v7();

    harness.create_job(project, 3).await;
    let urgent = harness
        .create_job_with(job_spec(project, 1).with_priority(JobPriority::INTERACTIVE))
        .await;

    let tasks = harness.dispatcher.get_next(ANALYST, 1).await.unwrap();
    assert_eq!(tasks[0].job_id, urgent.id);
}

#[tokio::test]
async fn test_same_priority_jobs_dispatch_in_creation_order() {
    let harness = Harness::new().await;
    let project = Uuid::now_v7();

    let first = harness.create_job(project, 2).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = harness.create_job(project, 1).await;

    let tasks = harness.dispatcher.get_next(ANALYST, 3).await.unwrap();
    let order: Vec<Uuid> = tasks.iter().map(|t| t.job_id).collect();
    assert_eq!(order, vec![first.id, first.id, second.id]);
}

#[tokio::test]
async fn test_lower_priority_value_dispatches_first_within_project() {
    let harness = Harness::new().await;
    let project = Uuid::now_v7();

    let background = harness
        .create_job_with(job_spec(project, 2).with_priority(200))
        .await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let standard = harness
        .create_job_with(job_spec(project, 2).with_priority(JobPriority::STANDARD))
        .await;

    let tasks = harness.dispatcher.get_next(ANALYST, 4).await.unwrap();
    let order: Vec<Uuid> = tasks.iter().map(|t| t.job_id).collect();
    assert_eq!(
        order,
        vec![standard.id, standard.id, background.id, background.id]
    );
}

#[tokio::test]
async fn test_timed_pause_blocks_dispatch_until_resumed_by_sweep() {
    let harness = Harness::new().await;
    let job = harness
        .create_job_with(job_spec(Uuid::now_v7(), 2).paused_for(3600))
        .await;
    assert!(job.paused);

    // 暂停期内不分派，维护扫描也不会提前恢复
    assert!(harness.dispatcher.get_next(ANALYST, 5).await.unwrap().is_empty());
    let maintenance = harness.maintenance(MaintenanceConfig::default());
    assert_eq!(maintenance.resume_paused_jobs().await.unwrap(), 0);
    harness.dispatcher.invalidate_priority_cache().await;
    assert!(harness.dispatcher.get_next(ANALYST, 5).await.unwrap().is_empty());

    // 暂停期到期后由维护扫描恢复
    harness
        .stores
        .jobs
        .set_paused(job.id, true, now_millis() - 1)
        .await
        .unwrap();
    assert!(harness.dispatcher.get_next(ANALYST, 5).await.unwrap().is_empty());
    assert_eq!(maintenance.resume_paused_jobs().await.unwrap(), 1);
    harness.dispatcher.invalidate_priority_cache().await;

    let tasks = harness.dispatcher.get_next(ANALYST, 5).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.job_id == job.id));
}

#[tokio::test]
async fn test_fair_pass_prefers_project_with_less_waiting_work() {
    let harness = Harness::new().await;
    let big = harness.create_job(Uuid::now_v7(), 6).await;
    let small = harness.create_job(Uuid::now_v7(), 2).await;

    let tasks = harness.dispatcher.get_next(ANALYST, 1).await.unwrap();
    assert_eq!(tasks[0].job_id, small.id);

    let tasks = harness.dispatcher.get_next(ANALYST, 10).await.unwrap();
    assert_eq!(tasks.iter().filter(|t| t.job_id == small.id).count(), 1);
    assert!(tasks.iter().any(|t| t.job_id == big.id));
}

#[tokio::test]
async fn test_paused_and_dependent_jobs_are_skipped() {
    let harness = Harness::new().await;
    let project = Uuid::now_v7();

    let paused = harness.create_job(project, 1).await;
    harness.lifecycle.pause_job(paused.id, None).await.unwrap();

    let upstream = harness.create_job(project, 1).await;
    let mut spec = job_spec(project, 1);
    spec.depends_on.push(upstream.id);
    let downstream = harness.create_job_with(spec).await;

    let tasks = harness.dispatcher.get_next(ANALYST, 10).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].job_id, upstream.id);

    // 上游成功后下游可以分派
    harness.lifecycle.start_task(tasks[0].id, ANALYST).await.unwrap();
    harness.lifecycle.stop_task(tasks[0].id, 0, false).await.unwrap();
    harness.dispatcher.invalidate_priority_cache().await;

    let tasks = harness.dispatcher.get_next(ANALYST, 10).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].job_id, downstream.id);
}

#[tokio::test]
async fn test_max_running_tasks_limits_dispatch() {
    let harness = Harness::new().await;
    let job = harness
        .create_job_with(job_spec(Uuid::now_v7(), 5).with_max_running_tasks(2))
        .await;

    let tasks = harness.dispatcher.get_next(ANALYST, 5).await.unwrap();
    assert_eq!(tasks.len(), 2);

    harness.lifecycle.start_task(tasks[0].id, ANALYST).await.unwrap();
    assert!(harness.dispatcher.get_next(ANALYST, 5).await.unwrap().is_empty());

    harness.lifecycle.stop_task(tasks[0].id, 0, false).await.unwrap();
    let more = harness.dispatcher.get_next(ANALYST, 5).await.unwrap();
    assert_eq!(more.len(), 1);
    assert_eq!(more[0].job_id, job.id);
}

#[tokio::test]
async fn test_request_size_is_capped() {
    let config = DispatcherConfig {
        max_tasks_per_request: 3,
        ..Default::default()
    };
    let harness = Harness::build(RecordingAnalystClient::default(), config).await;
    harness.create_job(Uuid::now_v7(), 10).await;

    let tasks = harness.dispatcher.get_next(ANALYST, 100).await.unwrap();
    assert_eq!(tasks.len(), 3);
}

#[tokio::test]
async fn test_queue_pending_tasks_carries_job_context() {
    let harness = Harness::new().await;
    let mut spec = job_spec(Uuid::now_v7(), 1);
    spec.env.insert("SHOW".to_string(), "demo".to_string());
    spec.args = serde_json::json!({"frames": "1-10"});
    let job = harness.create_job_with(spec).await;

    let starts = harness
        .dispatcher
        .queue_pending_tasks(ANALYST, 1)
        .await
        .unwrap();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].job_id, job.id);
    assert_eq!(starts[0].project_id, job.project_id);
    assert_eq!(starts[0].env.get("SHOW").map(String::as_str), Some("demo"));
    assert_eq!(starts[0].args["frames"], "1-10");
}
