use async_trait::async_trait;
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, AnyPool, Row};
use taskfarm_core::{
    models::{new_id, now_millis, Task, TaskError, TaskErrorFilter, TaskErrorSpec},
    traits::TaskErrorRepository,
    SchedulerResult,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::mapping::{bool_col, bool_value, json_col, to_json, uuid_col};

pub struct SqlxTaskErrorRepository {
    pool: AnyPool,
}

impl SqlxTaskErrorRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    fn row_to_error(row: &AnyRow) -> SchedulerResult<TaskError> {
        Ok(TaskError {
            id: uuid_col(row, "id")?,
            task_id: uuid_col(row, "task_id")?,
            job_id: uuid_col(row, "job_id")?,
            endpoint: row.try_get("endpoint")?,
            message: row.try_get("message")?,
            path: row.try_get("path")?,
            processor: row.try_get("processor")?,
            phase: row.try_get("phase")?,
            fatal: bool_col(row, "fatal")?,
            stack_trace: json_col(row, "stack_trace")?,
            time_created: row.try_get("time_created")?,
        })
    }

    async fn insert(
        conn: &mut AnyConnection,
        task: &Task,
        endpoint: Option<&str>,
        spec: &TaskErrorSpec,
        now: i64,
    ) -> SchedulerResult<TaskError> {
        let error = TaskError {
            id: new_id(),
            task_id: task.id,
            job_id: task.job_id,
            endpoint: endpoint.map(str::to_string),
            message: spec.message.clone(),
            path: spec.path.clone(),
            processor: spec.processor.clone(),
            phase: spec.phase.clone(),
            fatal: spec.fatal,
            stack_trace: spec.stack_trace.clone(),
            time_created: now,
        };

        sqlx::query(
            "INSERT INTO task_error (id, task_id, job_id, endpoint, message, path, processor, \
             phase, fatal, stack_trace, time_created) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(error.id.to_string())
        .bind(error.task_id.to_string())
        .bind(error.job_id.to_string())
        .bind(error.endpoint.clone())
        .bind(&error.message)
        .bind(error.path.clone())
        .bind(error.processor.clone())
        .bind(error.phase.clone())
        .bind(bool_value(error.fatal))
        .bind(to_json(&error.stack_trace)?)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(error)
    }
}

#[async_trait]
impl TaskErrorRepository for SqlxTaskErrorRepository {
    #[instrument(skip(self, task, spec), fields(task_id = %task.id))]
    async fn create(
        &self,
        task: &Task,
        endpoint: Option<&str>,
        spec: &TaskErrorSpec,
    ) -> SchedulerResult<TaskError> {
        let mut conn = self.pool.acquire().await?;
        Self::insert(&mut conn, task, endpoint, spec, now_millis()).await
    }

    #[instrument(skip(self, task, specs), fields(task_id = %task.id, count = specs.len()))]
    async fn batch_create(
        &self,
        task: &Task,
        endpoint: Option<&str>,
        specs: &[TaskErrorSpec],
    ) -> SchedulerResult<u64> {
        if specs.is_empty() {
            return Ok(0);
        }

        let now = now_millis();
        let mut tx = self.pool.begin().await?;
        for spec in specs {
            Self::insert(&mut tx, task, endpoint, spec, now).await?;
        }
        tx.commit().await?;

        debug!("写入 {} 条任务错误", specs.len());
        Ok(specs.len() as u64)
    }

    async fn list(&self, filter: &TaskErrorFilter) -> SchedulerResult<Vec<TaskError>> {
        let mut sql = String::from(
            "SELECT id, task_id, job_id, endpoint, message, path, processor, phase, fatal, \
             stack_trace, time_created FROM task_error WHERE 1 = 1",
        );
        let mut binds: Vec<Uuid> = Vec::new();
        if let Some(job_id) = filter.job_id {
            binds.push(job_id);
            sql.push_str(&format!(" AND job_id = ${}", binds.len()));
        }
        if let Some(task_id) = filter.task_id {
            binds.push(task_id);
            sql.push_str(&format!(" AND task_id = ${}", binds.len()));
        }
        sql.push_str(&format!(
            " ORDER BY time_created ASC, id ASC LIMIT {}",
            filter.limit.unwrap_or(1000).max(0)
        ));

        let mut query = sqlx::query(&sql);
        for id in &binds {
            query = query.bind(id.to_string());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_error).collect()
    }
}
