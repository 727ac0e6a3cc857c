use async_trait::async_trait;
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use taskfarm_core::{
    models::{
        new_id, now_millis, Analyst, AnalystFilter, AnalystSpec, AnalystState, LockState,
    },
    traits::AnalystRepository,
    SchedulerError, SchedulerResult,
};
use tracing::instrument;
use uuid::Uuid;

use super::mapping::{opt_uuid_col, uuid_col};

const ANALYST_COLUMNS: &str = "id, endpoint, task_id, total_ram, free_ram, free_disk, cpu_load, \
    state, lock_state, version, time_created, time_ping";

pub struct SqlxAnalystRepository {
    pool: AnyPool,
}

impl SqlxAnalystRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    fn row_to_analyst(row: &AnyRow) -> SchedulerResult<Analyst> {
        Ok(Analyst {
            id: uuid_col(row, "id")?,
            endpoint: row.try_get("endpoint")?,
            task_id: opt_uuid_col(row, "task_id")?,
            total_ram: row.try_get("total_ram")?,
            free_ram: row.try_get("free_ram")?,
            free_disk: row.try_get("free_disk")?,
            load: row.try_get("cpu_load")?,
            state: AnalystState::from_ordinal(row.try_get("state")?)?,
            lock_state: LockState::from_ordinal(row.try_get("lock_state")?)?,
            version: row.try_get("version")?,
            time_created: row.try_get("time_created")?,
            time_ping: row.try_get("time_ping")?,
        })
    }
}

#[async_trait]
impl AnalystRepository for SqlxAnalystRepository {
    #[instrument(skip(self, spec), fields(endpoint = %spec.endpoint))]
    async fn upsert(&self, spec: &AnalystSpec) -> SchedulerResult<Analyst> {
        if spec.endpoint.trim().is_empty() {
            return Err(SchedulerError::InvalidArgument(
                "Analyst地址不能为空".to_string(),
            ));
        }

        let now = now_millis();
        // 锁定状态由管理操作维护，心跳不覆盖
        sqlx::query(
            "INSERT INTO analyst (id, endpoint, task_id, total_ram, free_ram, free_disk, cpu_load, \
             state, lock_state, version, time_created, time_ping) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11) \
             ON CONFLICT (endpoint) DO UPDATE SET task_id = excluded.task_id, \
             total_ram = excluded.total_ram, free_ram = excluded.free_ram, \
             free_disk = excluded.free_disk, cpu_load = excluded.cpu_load, \
             state = excluded.state, version = excluded.version, time_ping = excluded.time_ping",
        )
        .bind(new_id().to_string())
        .bind(&spec.endpoint)
        .bind(spec.task_id.map(|id| id.to_string()))
        .bind(spec.total_ram)
        .bind(spec.free_ram)
        .bind(spec.free_disk)
        .bind(spec.load)
        .bind(AnalystState::Up.ordinal())
        .bind(LockState::Unlocked.ordinal())
        .bind(&spec.version)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get(&spec.endpoint).await
    }

    async fn exists(&self, endpoint: &str) -> SchedulerResult<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM analyst WHERE endpoint = $1")
            .bind(endpoint)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("cnt")?;
        Ok(count > 0)
    }

    async fn get(&self, endpoint: &str) -> SchedulerResult<Analyst> {
        let sql = format!("SELECT {ANALYST_COLUMNS} FROM analyst WHERE endpoint = $1");
        let row = sqlx::query(&sql)
            .bind(endpoint)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| SchedulerError::AnalystNotFound {
                endpoint: endpoint.to_string(),
            })?;
        Self::row_to_analyst(&row)
    }

    async fn list(&self, filter: &AnalystFilter) -> SchedulerResult<Vec<Analyst>> {
        let mut sql = format!("SELECT {ANALYST_COLUMNS} FROM analyst WHERE 1 = 1");
        if let Some(state) = filter.state {
            sql.push_str(&format!(" AND state = {}", state.ordinal()));
        }
        if let Some(lock_state) = filter.lock_state {
            sql.push_str(&format!(" AND lock_state = {}", lock_state.ordinal()));
        }
        sql.push_str(&format!(
            " ORDER BY endpoint ASC LIMIT {}",
            filter.limit.unwrap_or(1000).max(0)
        ));

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_analyst).collect()
    }

    async fn set_state(
        &self,
        id: Uuid,
        new_state: AnalystState,
        old_state: Option<AnalystState>,
    ) -> SchedulerResult<bool> {
        let result = match old_state {
            Some(old) => {
                sqlx::query("UPDATE analyst SET state = $1 WHERE id = $2 AND state = $3")
                    .bind(new_state.ordinal())
                    .bind(id.to_string())
                    .bind(old.ordinal())
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("UPDATE analyst SET state = $1 WHERE id = $2 AND state != $1")
                    .bind(new_state.ordinal())
                    .bind(id.to_string())
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }

    async fn set_lock_state(&self, endpoint: &str, state: LockState) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE analyst SET lock_state = $1 WHERE endpoint = $2 AND lock_state != $1",
        )
        .bind(state.ordinal())
        .bind(endpoint)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn is_locked(&self, endpoint: &str) -> SchedulerResult<bool> {
        let row = sqlx::query("SELECT lock_state FROM analyst WHERE endpoint = $1")
            .bind(endpoint)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let lock_state: i64 = row.try_get("lock_state")?;
                Ok(LockState::from_ordinal(lock_state)? == LockState::Locked)
            }
            None => Ok(false),
        }
    }

    async fn set_task_id(&self, endpoint: &str, task_id: Option<Uuid>) -> SchedulerResult<bool> {
        let result = sqlx::query("UPDATE analyst SET task_id = $1 WHERE endpoint = $2")
            .bind(task_id.map(|id| id.to_string()))
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_unresponsive(
        &self,
        state: AnalystState,
        cutoff: i64,
    ) -> SchedulerResult<Vec<Analyst>> {
        let sql = format!(
            "SELECT {ANALYST_COLUMNS} FROM analyst WHERE state = $1 AND time_ping < $2 \
             ORDER BY time_ping ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(state.ordinal())
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_analyst).collect()
    }

    async fn delete(&self, id: Uuid) -> SchedulerResult<bool> {
        let result = sqlx::query("DELETE FROM analyst WHERE id = $1 AND state = $2")
            .bind(id.to_string())
            .bind(AnalystState::Down.ordinal())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
