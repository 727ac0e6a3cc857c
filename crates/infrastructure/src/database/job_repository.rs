use async_trait::async_trait;
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, AnyPool, Row};
use taskfarm_core::{
    models::{
        millis_after, new_id, now_millis, AssetStats, DependSpec, Job, JobFilter, JobPriority,
        JobSpec, JobState, JobUpdateSpec, TaskStateCounts,
    },
    traits::JobRepository,
    SchedulerError, SchedulerResult,
};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::depend_repository::SqlxDependRepository;
use super::mapping::{bool_col, bool_value, json_col, opt_uuid_col, ordinal_list, to_json, uuid_col};
use super::task_repository::SqlxTaskRepository;

const JOB_COLUMNS: &str = "id, project_id, data_source_id, name, state, priority, paused, \
    time_pause_expired, max_running_tasks, depend_count, args, env, time_created, \
    time_modified, time_started, time_stopped";

/// 未指定时作业的默认并发上限
pub const DEFAULT_MAX_RUNNING_TASKS: i64 = 1024;

pub struct SqlxJobRepository {
    pool: AnyPool,
    default_max_running_tasks: i64,
}

impl SqlxJobRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self {
            pool,
            default_max_running_tasks: DEFAULT_MAX_RUNNING_TASKS,
        }
    }

    pub fn with_default_max_running_tasks(mut self, max: i64) -> Self {
        self.default_max_running_tasks = max;
        self
    }

    fn row_to_job(row: &AnyRow) -> SchedulerResult<Job> {
        Ok(Job {
            id: uuid_col(row, "id")?,
            project_id: uuid_col(row, "project_id")?,
            data_source_id: opt_uuid_col(row, "data_source_id")?,
            name: row.try_get("name")?,
            state: JobState::from_ordinal(row.try_get("state")?)?,
            priority: row.try_get("priority")?,
            paused: bool_col(row, "paused")?,
            time_pause_expired: row.try_get("time_pause_expired")?,
            max_running_tasks: row.try_get("max_running_tasks")?,
            depend_count: row.try_get("depend_count")?,
            args: json_col(row, "args")?,
            env: json_col(row, "env")?,
            time_created: row.try_get("time_created")?,
            time_modified: row.try_get("time_modified")?,
            time_started: row.try_get("time_started")?,
            time_stopped: row.try_get("time_stopped")?,
        })
    }

    fn row_to_counts(row: &AnyRow) -> SchedulerResult<TaskStateCounts> {
        Ok(TaskStateCounts {
            waiting: row.try_get("waiting")?,
            running: row.try_get("running")?,
            success: row.try_get("success")?,
            failure: row.try_get("failure")?,
            skipped: row.try_get("skipped")?,
            queued: row.try_get("queued")?,
            depend: row.try_get("depend")?,
            total: row.try_get("total")?,
        })
    }

    fn validate_spec(spec: &JobSpec) -> SchedulerResult<()> {
        if spec.name.trim().is_empty() {
            return Err(SchedulerError::InvalidArgument("作业名称不能为空".to_string()));
        }
        if let Some(max) = spec.max_running_tasks {
            if max <= 0 {
                return Err(SchedulerError::InvalidArgument(format!(
                    "最大并发运行任务数必须大于0: {max}"
                )));
            }
        }
        if let Some(seconds) = spec.pause_duration_seconds {
            if seconds <= 0 {
                return Err(SchedulerError::InvalidArgument(format!(
                    "暂停时长必须大于0: {seconds}"
                )));
            }
            millis_after(now_millis(), seconds)?;
        }
        Ok(())
    }

    async fn insert_job(
        &self,
        conn: &mut AnyConnection,
        id: Uuid,
        spec: &JobSpec,
        now: i64,
    ) -> SchedulerResult<()> {
        let priority = spec.priority.unwrap_or(JobPriority::STANDARD);
        let max_running_tasks = spec
            .max_running_tasks
            .unwrap_or(self.default_max_running_tasks);
        let (paused, time_pause_expired) = match spec.pause_duration_seconds {
            Some(seconds) => (true, millis_after(now, seconds)?),
            None => (spec.paused, -1),
        };

        sqlx::query(
            "INSERT INTO job (id, project_id, data_source_id, name, state, priority, paused, \
             time_pause_expired, max_running_tasks, depend_count, args, env, time_created, \
             time_modified, time_started, time_stopped) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, $10, $11, $12, $12, -1, -1)",
        )
        .bind(id.to_string())
        .bind(spec.project_id.to_string())
        .bind(spec.data_source_id.map(|d| d.to_string()))
        .bind(&spec.name)
        .bind(JobState::InProgress.ordinal())
        .bind(priority)
        .bind(bool_value(paused))
        .bind(time_pause_expired)
        .bind(max_running_tasks)
        .bind(to_json(&spec.args)?)
        .bind(to_json(&spec.env)?)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        sqlx::query("INSERT INTO job_count (job_id, time_updated) VALUES ($1, $2)")
            .bind(id.to_string())
            .bind(now)
            .execute(&mut *conn)
            .await?;

        sqlx::query("INSERT INTO job_stat (job_id) VALUES ($1)")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    async fn fetch_job(conn: &mut AnyConnection, id: Uuid) -> SchedulerResult<Job> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM job WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(SchedulerError::JobNotFound { id })?;
        Self::row_to_job(&row)
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    #[instrument(skip(self, spec), fields(name = %spec.name))]
    async fn create(&self, spec: &JobSpec) -> SchedulerResult<Job> {
        Self::validate_spec(spec)?;

        let now = now_millis();
        let id = new_id();
        let mut tx = self.pool.begin().await?;

        self.insert_job(&mut tx, id, spec, now).await?;

        for task in &spec.tasks {
            SqlxTaskRepository::insert_task(&mut tx, id, task, None, now).await?;
        }

        for dependee in &spec.depends_on {
            let depend = DependSpec::JobOnJob {
                depender: id,
                dependee: *dependee,
            };
            SqlxDependRepository::insert_depend(&mut tx, &depend, now).await?;
        }

        // 重新读取以包含依赖计数
        let job = Self::fetch_job(&mut tx, id).await?;
        tx.commit().await?;

        info!(
            "创建作业 {} ({})，任务数 {}",
            job.name,
            job.id,
            spec.tasks.len()
        );
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> SchedulerResult<Job> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_job(&mut conn, id).await
    }

    async fn list(&self, filter: &JobFilter) -> SchedulerResult<Vec<Job>> {
        let mut sql = format!("SELECT {JOB_COLUMNS} FROM job WHERE 1 = 1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(project_id) = filter.project_id {
            binds.push(project_id.to_string());
            sql.push_str(&format!(" AND project_id = ${}", binds.len()));
        }
        if let Some(states) = &filter.states {
            if states.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(
                " AND state IN ({})",
                ordinal_list(states.iter().map(|s| s.ordinal()))
            ));
        }
        if let Some(paused) = filter.paused {
            sql.push_str(&format!(" AND paused = {}", bool_value(paused)));
        }
        sql.push_str(&format!(
            " ORDER BY time_created DESC, id DESC LIMIT {} OFFSET {}",
            filter.limit.unwrap_or(100).max(0),
            filter.offset.unwrap_or(0).max(0)
        ));

        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_job).collect()
    }

    async fn update(&self, id: Uuid, spec: &JobUpdateSpec) -> SchedulerResult<bool> {
        if let Some(max) = spec.max_running_tasks {
            if max <= 0 {
                return Err(SchedulerError::InvalidArgument(format!(
                    "最大并发运行任务数必须大于0: {max}"
                )));
            }
        }

        let mut tx = self.pool.begin().await?;
        let current = Self::fetch_job(&mut tx, id).await?;

        let result = sqlx::query(
            "UPDATE job SET name = $1, priority = $2, paused = $3, time_pause_expired = $4, \
             max_running_tasks = $5, time_modified = $6 WHERE id = $7",
        )
        .bind(spec.name.clone().unwrap_or(current.name))
        .bind(spec.priority.unwrap_or(current.priority))
        .bind(bool_value(spec.paused.unwrap_or(current.paused)))
        .bind(spec.time_pause_expired.unwrap_or(current.time_pause_expired))
        .bind(spec.max_running_tasks.unwrap_or(current.max_running_tasks))
        .bind(now_millis())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> SchedulerResult<bool> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;
        let id_str = id.to_string();

        // 其他作业对本作业(或其任务)的依赖先解除，避免它们永远被阻塞
        let rows = sqlx::query(
            "SELECT id FROM depend WHERE state = 0 AND dependee_job_id = $1 AND depender_job_id != $1",
        )
        .bind(&id_str)
        .fetch_all(&mut *tx)
        .await?;
        for row in &rows {
            SqlxDependRepository::resolve_one(&mut tx, uuid_col(row, "id")?, now).await?;
        }

        for sql in [
            "DELETE FROM task_stat WHERE job_id = $1",
            "DELETE FROM task_error WHERE job_id = $1",
            "DELETE FROM depend WHERE depender_job_id = $1 OR dependee_job_id = $1",
            "DELETE FROM task WHERE job_id = $1",
            "DELETE FROM job_count WHERE job_id = $1",
            "DELETE FROM job_stat WHERE job_id = $1",
        ] {
            sqlx::query(sql).bind(&id_str).execute(&mut *tx).await?;
        }

        let result = sqlx::query("DELETE FROM job WHERE id = $1")
            .bind(&id_str)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn set_state(
        &self,
        id: Uuid,
        new_state: JobState,
        old_state: Option<JobState>,
    ) -> SchedulerResult<bool> {
        let mut tx = self.pool.begin().await?;

        let expected = match old_state {
            Some(state) => state,
            None => Self::fetch_job(&mut tx, id).await?.state,
        };
        if expected == new_state {
            return Ok(false);
        }

        let side_effects = if new_state.is_finished() {
            ", time_stopped = $4"
        } else if new_state == JobState::InProgress {
            ", time_stopped = -1"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE job SET state = $1, time_modified = $4{side_effects} WHERE id = $2 AND state = $3"
        );
        let result = sqlx::query(&sql)
            .bind(new_state.ordinal())
            .bind(id.to_string())
            .bind(expected.ordinal())
            .bind(now_millis())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            debug!("作业 {} 状态已变化，跳过 {:?} -> {:?}", id, expected, new_state);
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn set_time_started(&self, id: Uuid) -> SchedulerResult<bool> {
        let result =
            sqlx::query("UPDATE job SET time_started = $1 WHERE id = $2 AND time_started = -1")
                .bind(now_millis())
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_paused(&self, id: Uuid, paused: bool, expires_at: i64) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE job SET paused = $1, time_pause_expired = $2, time_modified = $3 WHERE id = $4",
        )
        .bind(bool_value(paused))
        .bind(if paused { expires_at } else { -1 })
        .bind(now_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn resume_paused(&self, now: i64) -> SchedulerResult<u64> {
        let result = sqlx::query(
            "UPDATE job SET paused = 0, time_pause_expired = -1, time_modified = $1 \
             WHERE state = $2 AND paused = 1 AND time_pause_expired != -1 AND time_pause_expired < $1",
        )
        .bind(now)
        .bind(JobState::InProgress.ordinal())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_counts(&self, id: Uuid) -> SchedulerResult<TaskStateCounts> {
        let row = sqlx::query(
            "SELECT waiting, running, success, failure, skipped, queued, depend, total \
             FROM job_count WHERE job_id = $1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SchedulerError::JobNotFound { id })?;
        Self::row_to_counts(&row)
    }

    async fn get_stats(&self, id: Uuid) -> SchedulerResult<AssetStats> {
        let row = sqlx::query(
            "SELECT asset_total, asset_errors, asset_warnings FROM job_stat WHERE job_id = $1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SchedulerError::JobNotFound { id })?;
        Ok(AssetStats {
            total: row.try_get("asset_total")?,
            errors: row.try_get("asset_errors")?,
            warnings: row.try_get("asset_warnings")?,
        })
    }

    async fn get_expired(&self, cutoff: i64, limit: i64) -> SchedulerResult<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM job WHERE state IN ({}) \
             AND time_stopped != -1 AND time_stopped < $1 ORDER BY time_stopped ASC LIMIT $2",
            ordinal_list(
                [JobState::Success, JobState::Failure, JobState::Cancelled]
                    .iter()
                    .map(|s| s.ordinal())
            )
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_job).collect()
    }
}
