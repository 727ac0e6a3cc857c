//! 作业任务计数(job_count)维护
//!
//! 任务每次进入或离开一个计数桶，都在同一事务内调整 job_count，
//! 保证各桶之和恒等于 `total`。Waiting 且依赖计数大于 0 的任务记在 `depend` 桶。

use sqlx::{AnyConnection, Row};
use taskfarm_core::{models::TaskState, SchedulerError, SchedulerResult};
use uuid::Uuid;

/// 任务所在的计数列
pub(crate) fn bucket_column(state: TaskState, depend_count: i64) -> &'static str {
    match state {
        TaskState::Waiting if depend_count > 0 => "depend",
        TaskState::Waiting => "waiting",
        TaskState::Running => "running",
        TaskState::Success => "success",
        TaskState::Failure => "failure",
        TaskState::Skipped => "skipped",
        TaskState::Queued => "queued",
    }
}

/// 把一个任务从 `from` 桶移到 `to` 桶
pub(crate) async fn move_bucket(
    conn: &mut AnyConnection,
    job_id: Uuid,
    from: &'static str,
    to: &'static str,
    now: i64,
) -> SchedulerResult<()> {
    if from == to {
        return Ok(());
    }

    let sql = format!(
        "UPDATE job_count SET {from} = {from} - 1, {to} = {to} + 1, time_updated = $1 WHERE job_id = $2"
    );
    let result = sqlx::query(&sql)
        .bind(now)
        .bind(job_id.to_string())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() != 1 {
        return Err(SchedulerError::JobNotFound { id: job_id });
    }
    Ok(())
}

/// 新任务计入 `to` 桶并增加总数
pub(crate) async fn add_to_bucket(
    conn: &mut AnyConnection,
    job_id: Uuid,
    to: &'static str,
    now: i64,
) -> SchedulerResult<()> {
    let sql = format!(
        "UPDATE job_count SET {to} = {to} + 1, total = total + 1, time_updated = $1 WHERE job_id = $2"
    );
    let result = sqlx::query(&sql)
        .bind(now)
        .bind(job_id.to_string())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() != 1 {
        return Err(SchedulerError::JobNotFound { id: job_id });
    }
    Ok(())
}

/// 调整任务依赖计数，必要时在 waiting 与 depend 桶之间移动
///
/// 减少时不会低于 0；返回调整后的依赖计数。
pub(crate) async fn adjust_task_depend_count(
    conn: &mut AnyConnection,
    task_id: Uuid,
    delta: i64,
    now: i64,
) -> SchedulerResult<i64> {
    let sql = if delta < 0 {
        "UPDATE task SET depend_count = depend_count + $1, time_modified = $2 \
         WHERE id = $3 AND depend_count + $1 >= 0"
    } else {
        "UPDATE task SET depend_count = depend_count + $1, time_modified = $2 WHERE id = $3"
    };
    let result = sqlx::query(sql)
        .bind(delta)
        .bind(now)
        .bind(task_id.to_string())
        .execute(&mut *conn)
        .await?;

    let row = sqlx::query("SELECT job_id, state, depend_count FROM task WHERE id = $1")
        .bind(task_id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(SchedulerError::TaskNotFound { id: task_id })?;

    let depend_count: i64 = row.try_get("depend_count")?;
    if result.rows_affected() == 0 {
        return Ok(depend_count);
    }

    let state = TaskState::from_ordinal(row.try_get("state")?)?;
    let job_id = super::mapping::uuid_col(&row, "job_id")?;
    let before = bucket_column(state, depend_count - delta);
    let after = bucket_column(state, depend_count);
    move_bucket(conn, job_id, before, after, now).await?;

    Ok(depend_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waiting_with_depends_counts_as_depend() {
        assert_eq!(bucket_column(TaskState::Waiting, 0), "waiting");
        assert_eq!(bucket_column(TaskState::Waiting, 2), "depend");
        assert_eq!(bucket_column(TaskState::Queued, 2), "queued");
        assert_eq!(bucket_column(TaskState::Failure, 0), "failure");
    }
}
