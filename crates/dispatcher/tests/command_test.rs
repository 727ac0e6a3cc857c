mod common;

use std::time::Duration;

use common::{Harness, ANALYST};
use serde_json::json;
use sqlx::Row;
use taskfarm_core::{
    models::{Command, CommandSpec, CommandState, CommandType, JobState},
    SchedulerError,
};
use taskfarm_dispatcher::CommandExecutor;
use uuid::Uuid;

/// 等待命令进入终态
async fn wait_done(executor: &CommandExecutor, id: Uuid) -> Command {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let command = executor.get(id).await.unwrap();
            if matches!(command.state, CommandState::Finished | CommandState::Failure) {
                return command;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("command finished in time")
}

#[tokio::test]
async fn test_invalid_arguments_are_rejected_before_persisting() {
    let harness = Harness::new().await;
    let (executor, _handle) =
        CommandExecutor::start(harness.stores.commands.clone(), harness.lifecycle.clone());

    let missing = CommandSpec::new(CommandType::CancelJob, vec![]);
    assert!(matches!(
        executor.submit(&missing).await,
        Err(SchedulerError::InvalidArgument(_))
    ));

    let wrong_type = CommandSpec::new(
        CommandType::SetJobPriority,
        vec![json!(Uuid::now_v7().to_string()), json!("high")],
    );
    assert!(matches!(
        executor.submit(&wrong_type).await,
        Err(SchedulerError::InvalidArgument(_))
    ));

    let row = sqlx::query("SELECT COUNT(*) AS n FROM command")
        .fetch_one(harness.db.pool())
        .await
        .unwrap();
    assert_eq!(row.try_get::<i64, _>("n").unwrap(), 0);
}

#[tokio::test]
async fn test_commands_execute_in_background() {
    let harness = Harness::new().await;
    let job = harness.create_job(Uuid::now_v7(), 2).await;
    let (executor, _handle) =
        CommandExecutor::start(harness.stores.commands.clone(), harness.lifecycle.clone());

    let command = executor
        .submit(&CommandSpec::new(
            CommandType::SetJobPriority,
            vec![json!(job.id.to_string()), json!(5)],
        ))
        .await
        .unwrap();
    assert_eq!(command.state, CommandState::Waiting);

    let done = wait_done(&executor, command.id).await;
    assert_eq!(done.state, CommandState::Finished);
    assert!(done.time_started > 0);
    assert!(done.time_stopped >= done.time_started);
    assert_eq!(harness.lifecycle.get_job(job.id).await.unwrap().priority, 5);

    let cancel = executor
        .submit(&CommandSpec::new(
            CommandType::CancelJob,
            vec![json!(job.id.to_string())],
        ))
        .await
        .unwrap();
    assert_eq!(wait_done(&executor, cancel.id).await.state, CommandState::Finished);
    assert_eq!(
        harness.lifecycle.get_job(job.id).await.unwrap().state,
        JobState::Cancelled
    );
}

#[tokio::test]
async fn test_retry_all_failures_command() {
    let harness = Harness::new().await;
    let job = harness.create_job(Uuid::now_v7(), 1).await;
    let task = harness.run_task(ANALYST).await;
    harness.lifecycle.stop_task(task.id, 1, true).await.unwrap();

    let (executor, _handle) =
        CommandExecutor::start(harness.stores.commands.clone(), harness.lifecycle.clone());
    let command = executor
        .submit(&CommandSpec::new(
            CommandType::RetryAllFailures,
            vec![json!(job.id.to_string())],
        ))
        .await
        .unwrap();

    let done = wait_done(&executor, command.id).await;
    assert_eq!(done.state, CommandState::Finished);
    assert_eq!(harness.stores.jobs.get_counts(job.id).await.unwrap().waiting, 1);
}

#[tokio::test]
async fn test_failed_command_records_message() {
    let harness = Harness::new().await;
    let (executor, _handle) =
        CommandExecutor::start(harness.stores.commands.clone(), harness.lifecycle.clone());

    let command = executor
        .submit(&CommandSpec::new(
            CommandType::DeleteJob,
            vec![json!(Uuid::now_v7().to_string())],
        ))
        .await
        .unwrap();

    let done = wait_done(&executor, command.id).await;
    assert_eq!(done.state, CommandState::Failure);
    assert!(done.message.is_some());
}

#[tokio::test]
async fn test_worker_exits_when_executor_dropped() {
    let harness = Harness::new().await;
    let (executor, handle) =
        CommandExecutor::start(harness.stores.commands.clone(), harness.lifecycle.clone());
    drop(executor);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker stopped")
        .unwrap();
}
