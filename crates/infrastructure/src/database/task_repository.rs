use async_trait::async_trait;
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, AnyPool, Row};
use taskfarm_core::{
    models::{
        new_id, now_millis, AssetStats, DispatchPriority, JobPriority, JobState, Task, TaskFilter,
        TaskSpec, TaskState,
    },
    traits::TaskRepository,
    SchedulerError, SchedulerResult,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::counters::{add_to_bucket, bucket_column, move_bucket};
use super::mapping::{json_col, opt_uuid_col, ordinal_list, to_json, uuid_col};

pub(crate) const TASK_COLUMNS: &str = "t.id, t.job_id, t.parent_id, t.name, t.state, t.host, \
    t.run_count, t.progress, t.exit_status, t.script, t.depend_count, t.time_created, \
    t.time_modified, t.time_started, t.time_stopped, t.time_ping";

/// 可分派候选任务的公共条件：作业进行中、未暂停、无作业级依赖、未达并发上限
const DISPATCHABLE: &str = "t.state = 0 AND t.depend_count = 0 \
    AND j.state = 0 AND j.paused = 0 AND j.depend_count = 0 \
    AND (jc.running + jc.queued) < j.max_running_tasks";

const DISPATCH_ORDER: &str =
    "ORDER BY j.priority ASC, j.time_created ASC, j.id ASC, t.time_created ASC, t.id ASC";

pub struct SqlxTaskRepository {
    pool: AnyPool,
}

impl SqlxTaskRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub(crate) fn row_to_task(row: &AnyRow) -> SchedulerResult<Task> {
        Ok(Task {
            id: uuid_col(row, "id")?,
            job_id: uuid_col(row, "job_id")?,
            parent_id: opt_uuid_col(row, "parent_id")?,
            name: row.try_get("name")?,
            state: TaskState::from_ordinal(row.try_get("state")?)?,
            host: row.try_get("host")?,
            run_count: row.try_get("run_count")?,
            progress: row.try_get("progress")?,
            exit_status: row.try_get("exit_status")?,
            script: json_col(row, "script")?,
            depend_count: row.try_get("depend_count")?,
            time_created: row.try_get("time_created")?,
            time_modified: row.try_get("time_modified")?,
            time_started: row.try_get("time_started")?,
            time_stopped: row.try_get("time_stopped")?,
            time_ping: row.try_get("time_ping")?,
        })
    }

    /// 在已有事务中插入任务、统计行并计入作业计数
    pub(crate) async fn insert_task(
        conn: &mut AnyConnection,
        job_id: Uuid,
        spec: &TaskSpec,
        parent_id: Option<Uuid>,
        now: i64,
    ) -> SchedulerResult<Task> {
        let id = new_id();
        sqlx::query(
            "INSERT INTO task (id, job_id, parent_id, name, state, run_count, progress, \
             exit_status, script, depend_count, time_created, time_modified, time_started, \
             time_stopped, time_ping) \
             VALUES ($1, $2, $3, $4, 0, 0, 0, -1, $5, 0, $6, $6, -1, -1, -1)",
        )
        .bind(id.to_string())
        .bind(job_id.to_string())
        .bind(parent_id.map(|p| p.to_string()))
        .bind(&spec.name)
        .bind(to_json(&spec.script)?)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        sqlx::query("INSERT INTO task_stat (task_id, job_id) VALUES ($1, $2)")
            .bind(id.to_string())
            .bind(job_id.to_string())
            .execute(&mut *conn)
            .await?;

        add_to_bucket(conn, job_id, bucket_column(TaskState::Waiting, 0), now).await?;

        Ok(Task {
            id,
            job_id,
            parent_id,
            name: spec.name.clone(),
            state: TaskState::Waiting,
            host: None,
            run_count: 0,
            progress: 0,
            exit_status: -1,
            script: spec.script.clone(),
            depend_count: 0,
            time_created: now,
            time_modified: now,
            time_started: -1,
            time_stopped: -1,
            time_ping: -1,
        })
    }

    /// 在已有事务中执行条件状态迁移
    ///
    /// 更新成功后再读取依赖计数：此时行已被本事务锁定，读到的值即迁移时刻的值。
    pub(crate) async fn transition(
        conn: &mut AnyConnection,
        id: Uuid,
        new_state: TaskState,
        old_state: Option<TaskState>,
    ) -> SchedulerResult<bool> {
        let expected = match old_state {
            Some(state) => state,
            None => {
                let row = sqlx::query("SELECT state FROM task WHERE id = $1")
                    .bind(id.to_string())
                    .fetch_optional(&mut *conn)
                    .await?
                    .ok_or(SchedulerError::TaskNotFound { id })?;
                TaskState::from_ordinal(row.try_get("state")?)?
            }
        };
        if expected == new_state {
            return Ok(false);
        }

        let side_effects = match new_state {
            TaskState::Waiting => ", time_started = -1, time_stopped = -1, progress = 0",
            TaskState::Running => {
                ", time_ping = $4, time_started = $4, run_count = run_count + 1, \
                 time_stopped = -1, progress = 0"
            }
            TaskState::Success | TaskState::Failure | TaskState::Skipped => {
                ", time_stopped = $4, progress = 100"
            }
            TaskState::Queued => ", time_ping = $4",
        };
        let sql = format!(
            "UPDATE task SET state = $1, time_modified = $4{side_effects} WHERE id = $2 AND state = $3"
        );

        let now = now_millis();
        let result = sqlx::query(&sql)
            .bind(new_state.ordinal())
            .bind(id.to_string())
            .bind(expected.ordinal())
            .bind(now)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            debug!("任务 {} 状态已变化，跳过 {:?} -> {:?}", id, expected, new_state);
            return Ok(false);
        }

        let row = sqlx::query("SELECT job_id, depend_count FROM task WHERE id = $1")
            .bind(id.to_string())
            .fetch_one(&mut *conn)
            .await?;
        let job_id = uuid_col(&row, "job_id")?;
        let depend_count: i64 = row.try_get("depend_count")?;

        move_bucket(
            conn,
            job_id,
            bucket_column(expected, depend_count),
            bucket_column(new_state, depend_count),
            now,
        )
        .await?;

        Ok(true)
    }

    async fn fetch_candidates(
        &self,
        extra_condition: &str,
        bind_value: BindValue,
        limit: i64,
    ) -> SchedulerResult<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM task t \
             JOIN job j ON j.id = t.job_id \
             JOIN job_count jc ON jc.job_id = j.id \
             WHERE {DISPATCHABLE} AND {extra_condition} \
             {DISPATCH_ORDER} LIMIT $2"
        );
        let query = sqlx::query(&sql);
        let query = match bind_value {
            BindValue::Int(v) => query.bind(v),
            BindValue::Text(v) => query.bind(v),
        };
        let rows = query.bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }
}

enum BindValue {
    Int(i64),
    Text(String),
}

#[async_trait]
impl TaskRepository for SqlxTaskRepository {
    #[instrument(skip(self, spec))]
    async fn create(
        &self,
        job_id: Uuid,
        spec: &TaskSpec,
        parent_id: Option<Uuid>,
    ) -> SchedulerResult<Task> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT state FROM job WHERE id = $1")
            .bind(job_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(SchedulerError::JobNotFound { id: job_id })?;
        let job_state = JobState::from_ordinal(row.try_get("state")?)?;
        if job_state != JobState::InProgress {
            return Err(SchedulerError::InvalidState(format!(
                "作业 {job_id} 处于 {job_state:?} 状态，不能添加任务"
            )));
        }

        let task = Self::insert_task(&mut tx, job_id, spec, parent_id, now_millis()).await?;
        tx.commit().await?;
        Ok(task)
    }

    async fn get(&self, id: Uuid) -> SchedulerResult<Task> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM task t WHERE t.id = $1");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id })?;
        Self::row_to_task(&row)
    }

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        let mut sql = format!("SELECT {TASK_COLUMNS} FROM task t WHERE 1 = 1");
        let mut binds = Vec::new();

        if let Some(job_id) = filter.job_id {
            binds.push(job_id.to_string());
            sql.push_str(&format!(" AND t.job_id = ${}", binds.len()));
        }
        if let Some(host) = &filter.host {
            binds.push(host.clone());
            sql.push_str(&format!(" AND t.host = ${}", binds.len()));
        }
        if let Some(states) = &filter.states {
            if states.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(
                " AND t.state IN ({})",
                ordinal_list(states.iter().map(|s| s.ordinal()))
            ));
        }
        sql.push_str(" ORDER BY t.time_created ASC, t.id ASC");
        sql.push_str(&format!(
            " LIMIT {} OFFSET {}",
            filter.limit.unwrap_or(1000).max(0),
            filter.offset.unwrap_or(0).max(0)
        ));

        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self))]
    async fn set_state(
        &self,
        id: Uuid,
        new_state: TaskState,
        old_state: Option<TaskState>,
    ) -> SchedulerResult<bool> {
        let mut tx = self.pool.begin().await?;
        let changed = Self::transition(&mut tx, id, new_state, old_state).await?;
        if changed {
            tx.commit().await?;
        }
        Ok(changed)
    }

    #[instrument(skip(self))]
    async fn queue(&self, id: Uuid, endpoint: &str) -> SchedulerResult<bool> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE task SET state = $1, host = $2, time_modified = $3, time_ping = $3 \
             WHERE id = $4 AND state = $5 AND depend_count = 0 \
             AND EXISTS (SELECT 1 FROM job WHERE job.id = task.job_id \
             AND job.state = $6 AND job.paused = 0 AND job.depend_count = 0)",
        )
        .bind(TaskState::Queued.ordinal())
        .bind(endpoint)
        .bind(now)
        .bind(id.to_string())
        .bind(TaskState::Waiting.ordinal())
        .bind(JobState::InProgress.ordinal())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        let row = sqlx::query("SELECT job_id FROM task WHERE id = $1")
            .bind(id.to_string())
            .fetch_one(&mut *tx)
            .await?;
        let job_id = uuid_col(&row, "job_id")?;
        move_bucket(&mut tx, job_id, "waiting", "queued", now).await?;

        // 计数与领取在同一事务内，超过并发上限则整体回滚
        let row = sqlx::query(
            "SELECT jc.running + jc.queued AS active, j.max_running_tasks \
             FROM job_count jc JOIN job j ON j.id = jc.job_id WHERE jc.job_id = $1",
        )
        .bind(job_id.to_string())
        .fetch_one(&mut *tx)
        .await?;
        let active: i64 = row.try_get("active")?;
        let max_running: i64 = row.try_get("max_running_tasks")?;
        if active > max_running {
            debug!("作业 {} 已达到并发上限 {}", job_id, max_running);
            return Ok(false);
        }

        sqlx::query("UPDATE analyst SET task_id = $1 WHERE endpoint = $2")
            .bind(id.to_string())
            .bind(endpoint)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn set_exit_status(&self, id: Uuid, exit_status: i64) -> SchedulerResult<bool> {
        let result =
            sqlx::query("UPDATE task SET exit_status = $1, time_modified = $2 WHERE id = $3")
                .bind(exit_status)
                .bind(now_millis())
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_progress(&self, id: Uuid, progress: i64) -> SchedulerResult<bool> {
        let result = sqlx::query("UPDATE task SET progress = $1 WHERE id = $2 AND state = $3")
            .bind(progress.clamp(0, 100))
            .bind(id.to_string())
            .bind(TaskState::Running.ordinal())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn is_auto_retryable(&self, id: Uuid, limit: i64) -> SchedulerResult<bool> {
        let row = sqlx::query("SELECT run_count FROM task WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id })?;
        let run_count: i64 = row.try_get("run_count")?;
        Ok(run_count <= limit)
    }

    async fn update_ping_time(&self, id: Uuid, endpoint: &str) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE task SET time_ping = $1 WHERE id = $2 AND host = $3 AND state = $4",
        )
        .bind(now_millis())
        .bind(id.to_string())
        .bind(endpoint)
        .bind(TaskState::Running.ordinal())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_orphans(&self, cutoff: i64, limit: i64) -> SchedulerResult<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM task t WHERE t.state IN ({}) AND t.time_ping < $1 \
             ORDER BY t.time_ping ASC LIMIT $2",
            ordinal_list([TaskState::Running.ordinal(), TaskState::Queued.ordinal()])
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn get_dispatch_priority(&self) -> SchedulerResult<Vec<DispatchPriority>> {
        let rows = sqlx::query(
            "SELECT j.project_id, COUNT(*) AS waiting FROM task t \
             JOIN job j ON j.id = t.job_id \
             WHERE t.state = 0 AND t.depend_count = 0 AND j.state = 0 AND j.paused = 0 \
             GROUP BY j.project_id ORDER BY waiting ASC, j.project_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DispatchPriority {
                    project_id: uuid_col(row, "project_id")?,
                    priority: row.try_get("waiting")?,
                })
            })
            .collect()
    }

    async fn get_waiting_by_job_priority(
        &self,
        max_priority: i64,
        limit: i64,
    ) -> SchedulerResult<Vec<Task>> {
        self.fetch_candidates("j.priority <= $1", BindValue::Int(max_priority), limit)
            .await
    }

    async fn get_waiting_by_project(
        &self,
        project_id: Uuid,
        limit: i64,
    ) -> SchedulerResult<Vec<Task>> {
        // 交互优先级的作业已在首轮处理
        let condition = format!("j.project_id = $1 AND j.priority > {}", JobPriority::INTERACTIVE);
        self.fetch_candidates(&condition, BindValue::Text(project_id.to_string()), limit)
            .await
    }

    async fn increment_stats(&self, id: Uuid, stats: &AssetStats) -> SchedulerResult<()> {
        if stats.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE task_stat SET asset_total = asset_total + $1, \
             asset_errors = asset_errors + $2, asset_warnings = asset_warnings + $3 \
             WHERE task_id = $4",
        )
        .bind(stats.total)
        .bind(stats.errors)
        .bind(stats.warnings)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound { id });
        }

        sqlx::query(
            "UPDATE job_stat SET asset_total = asset_total + $1, \
             asset_errors = asset_errors + $2, asset_warnings = asset_warnings + $3 \
             WHERE job_id = (SELECT job_id FROM task WHERE id = $4)",
        )
        .bind(stats.total)
        .bind(stats.errors)
        .bind(stats.warnings)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_stats(&self, id: Uuid) -> SchedulerResult<AssetStats> {
        let row = sqlx::query(
            "SELECT asset_total, asset_errors, asset_warnings FROM task_stat WHERE task_id = $1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SchedulerError::TaskNotFound { id })?;
        Ok(AssetStats {
            total: row.try_get("asset_total")?,
            errors: row.try_get("asset_errors")?,
            warnings: row.try_get("asset_warnings")?,
        })
    }
}
