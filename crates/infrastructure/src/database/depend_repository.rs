use async_trait::async_trait;
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, AnyPool, Row};
use taskfarm_core::{
    models::{
        new_id, now_millis, Depend, DependSpec, DependState, DependType, JobState, TaskState,
    },
    traits::DependRepository,
    SchedulerError, SchedulerResult,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::counters::adjust_task_depend_count;
use super::mapping::{opt_uuid_col, uuid_col};

const DEPEND_COLUMNS: &str = "id, depend_type, state, depender_job_id, dependee_job_id, \
    depender_task_id, dependee_task_id, time_created, time_modified";

pub struct SqlxDependRepository {
    pool: AnyPool,
}

impl SqlxDependRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    fn row_to_depend(row: &AnyRow) -> SchedulerResult<Depend> {
        Ok(Depend {
            id: uuid_col(row, "id")?,
            depend_type: DependType::from_ordinal(row.try_get("depend_type")?)?,
            state: DependState::from_ordinal(row.try_get("state")?)?,
            depender_job_id: uuid_col(row, "depender_job_id")?,
            dependee_job_id: uuid_col(row, "dependee_job_id")?,
            depender_task_id: opt_uuid_col(row, "depender_task_id")?,
            dependee_task_id: opt_uuid_col(row, "dependee_task_id")?,
            time_created: row.try_get("time_created")?,
            time_modified: row.try_get("time_modified")?,
        })
    }

    async fn job_state(conn: &mut AnyConnection, id: Uuid) -> SchedulerResult<JobState> {
        let row = sqlx::query("SELECT state FROM job WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(SchedulerError::JobNotFound { id })?;
        JobState::from_ordinal(row.try_get("state")?)
    }

    async fn task_state(conn: &mut AnyConnection, id: Uuid) -> SchedulerResult<(Uuid, TaskState)> {
        let row = sqlx::query("SELECT job_id, state FROM task WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id })?;
        Ok((
            uuid_col(&row, "job_id")?,
            TaskState::from_ordinal(row.try_get("state")?)?,
        ))
    }

    /// 在已有事务中创建依赖边
    ///
    /// 被依赖方已经成功结束时不创建，返回 None。
    pub(crate) async fn insert_depend(
        conn: &mut AnyConnection,
        spec: &DependSpec,
        now: i64,
    ) -> SchedulerResult<Option<Depend>> {
        let (depender_job_id, dependee_job_id, depender_task_id, dependee_task_id) = match *spec {
            DependSpec::JobOnJob { depender, dependee } => {
                if depender == dependee {
                    return Err(SchedulerError::InvalidArgument(
                        "作业不能依赖自身".to_string(),
                    ));
                }
                Self::job_state(conn, depender).await?;
                if Self::job_state(conn, dependee).await? == JobState::Success {
                    return Ok(None);
                }
                (depender, dependee, None, None)
            }
            DependSpec::TaskOnTask { depender, dependee } => {
                if depender == dependee {
                    return Err(SchedulerError::InvalidArgument(
                        "任务不能依赖自身".to_string(),
                    ));
                }
                let (depender_job, _) = Self::task_state(conn, depender).await?;
                let (dependee_job, dependee_state) = Self::task_state(conn, dependee).await?;
                if dependee_state.is_successful() {
                    return Ok(None);
                }
                (depender_job, dependee_job, Some(depender), Some(dependee))
            }
        };

        let depend = Depend {
            id: new_id(),
            depend_type: spec.depend_type(),
            state: DependState::Active,
            depender_job_id,
            dependee_job_id,
            depender_task_id,
            dependee_task_id,
            time_created: now,
            time_modified: now,
        };

        sqlx::query(
            "INSERT INTO depend (id, depend_type, state, depender_job_id, dependee_job_id, \
             depender_task_id, dependee_task_id, time_created, time_modified) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)",
        )
        .bind(depend.id.to_string())
        .bind(depend.depend_type.ordinal())
        .bind(depend.state.ordinal())
        .bind(depender_job_id.to_string())
        .bind(dependee_job_id.to_string())
        .bind(depender_task_id.map(|id| id.to_string()))
        .bind(dependee_task_id.map(|id| id.to_string()))
        .bind(now)
        .execute(&mut *conn)
        .await?;

        match depender_task_id {
            Some(task_id) => {
                adjust_task_depend_count(conn, task_id, 1, now).await?;
            }
            None => {
                sqlx::query(
                    "UPDATE job SET depend_count = depend_count + 1, time_modified = $1 WHERE id = $2",
                )
                .bind(now)
                .bind(depender_job_id.to_string())
                .execute(&mut *conn)
                .await?;
            }
        }

        Ok(Some(depend))
    }

    /// 在已有事务中解除一条依赖边；已解除的边返回 false
    pub(crate) async fn resolve_one(
        conn: &mut AnyConnection,
        id: Uuid,
        now: i64,
    ) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE depend SET state = $1, time_modified = $2 WHERE id = $3 AND state = $4",
        )
        .bind(DependState::Inactive.ordinal())
        .bind(now)
        .bind(id.to_string())
        .bind(DependState::Active.ordinal())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        let sql = format!("SELECT {DEPEND_COLUMNS} FROM depend WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_one(&mut *conn)
            .await?;
        let depend = Self::row_to_depend(&row)?;

        match depend.depender_task_id {
            Some(task_id) if depend.depend_type == DependType::TaskOnTask => {
                adjust_task_depend_count(conn, task_id, -1, now).await?;
            }
            _ => {
                sqlx::query(
                    "UPDATE job SET depend_count = depend_count - 1, time_modified = $1 \
                     WHERE id = $2 AND depend_count > 0",
                )
                .bind(now)
                .bind(depend.depender_job_id.to_string())
                .execute(&mut *conn)
                .await?;
            }
        }

        debug!("解除依赖 {} ({:?})", id, depend.depend_type);
        Ok(true)
    }
}

#[async_trait]
impl DependRepository for SqlxDependRepository {
    #[instrument(skip(self))]
    async fn create(&self, spec: &DependSpec) -> SchedulerResult<Option<Depend>> {
        let mut tx = self.pool.begin().await?;
        let depend = Self::insert_depend(&mut tx, spec, now_millis()).await?;
        tx.commit().await?;
        Ok(depend)
    }

    async fn get(&self, id: Uuid) -> SchedulerResult<Depend> {
        let sql = format!("SELECT {DEPEND_COLUMNS} FROM depend WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(SchedulerError::DependNotFound { id })?;
        Self::row_to_depend(&row)
    }

    async fn resolve(&self, ids: &[Uuid]) -> SchedulerResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let now = now_millis();
        let mut tx = self.pool.begin().await?;
        let mut resolved = 0;
        for id in ids {
            if Self::resolve_one(&mut tx, *id, now).await? {
                resolved += 1;
            }
        }
        tx.commit().await?;
        Ok(resolved)
    }

    async fn get_dependents(
        &self,
        depend_type: DependType,
        dependee: Uuid,
    ) -> SchedulerResult<Vec<Depend>> {
        let column = match depend_type {
            DependType::JobOnJob => "dependee_job_id",
            DependType::TaskOnTask => "dependee_task_id",
        };
        let sql = format!(
            "SELECT {DEPEND_COLUMNS} FROM depend \
             WHERE depend_type = $1 AND state = $2 AND {column} = $3 ORDER BY time_created ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(depend_type.ordinal())
            .bind(DependState::Active.ordinal())
            .bind(dependee.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_depend).collect()
    }

    async fn get_dependencies(
        &self,
        depend_type: DependType,
        depender: Uuid,
    ) -> SchedulerResult<Vec<Depend>> {
        let column = match depend_type {
            DependType::JobOnJob => "depender_job_id",
            DependType::TaskOnTask => "depender_task_id",
        };
        let sql = format!(
            "SELECT {DEPEND_COLUMNS} FROM depend \
             WHERE depend_type = $1 AND state = $2 AND {column} = $3 ORDER BY time_created ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(depend_type.ordinal())
            .bind(DependState::Active.ordinal())
            .bind(depender.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_depend).collect()
    }
}
