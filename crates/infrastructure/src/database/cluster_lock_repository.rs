use async_trait::async_trait;
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use taskfarm_core::{
    models::{millis_after, now_millis, ClusterLock, ClusterLockSpec, LockStatus},
    traits::ClusterLockRepository,
    SchedulerError, SchedulerResult,
};
use tracing::{debug, instrument};

pub struct SqlxClusterLockRepository {
    pool: AnyPool,
}

impl SqlxClusterLockRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    fn row_to_lock(row: &AnyRow) -> SchedulerResult<ClusterLock> {
        Ok(ClusterLock {
            name: row.try_get("name")?,
            host: row.try_get("host")?,
            combine_count: row.try_get("combine_count")?,
            time_locked: row.try_get("time_locked")?,
            time_expired: row.try_get("time_expired")?,
        })
    }
}

#[async_trait]
impl ClusterLockRepository for SqlxClusterLockRepository {
    #[instrument(skip(self, spec), fields(lock = %spec.name))]
    async fn lock(&self, spec: &ClusterLockSpec, host: &str) -> SchedulerResult<LockStatus> {
        if spec.name.is_empty() {
            return Err(SchedulerError::InvalidArgument("锁名称不能为空".to_string()));
        }
        if spec.timeout_seconds <= 0 {
            return Err(SchedulerError::InvalidArgument(
                "锁超时时间必须大于0".to_string(),
            ));
        }

        let now = now_millis();
        let expires = millis_after(now, spec.timeout_seconds)?;

        let inserted = sqlx::query(
            "INSERT INTO cluster_lock (name, host, combine_count, time_locked, time_expired) \
             VALUES ($1, $2, 0, $3, $4) ON CONFLICT (name) DO NOTHING",
        )
        .bind(&spec.name)
        .bind(host)
        .bind(now)
        .bind(expires)
        .execute(&self.pool)
        .await?;
        if inserted.rows_affected() == 1 {
            debug!("获得集群锁 {}", spec.name);
            return Ok(LockStatus::Locked);
        }

        // 持有者的租约已过期，直接接管
        let taken = sqlx::query(
            "UPDATE cluster_lock SET host = $1, combine_count = 0, time_locked = $2, \
             time_expired = $3 WHERE name = $4 AND time_expired < $2",
        )
        .bind(host)
        .bind(now)
        .bind(expires)
        .bind(&spec.name)
        .execute(&self.pool)
        .await?;
        if taken.rows_affected() == 1 {
            debug!("接管已过期的集群锁 {}", spec.name);
            return Ok(LockStatus::Locked);
        }

        if spec.combine_multiple {
            let combined = sqlx::query(
                "UPDATE cluster_lock SET combine_count = combine_count + 1 WHERE name = $1",
            )
            .bind(&spec.name)
            .execute(&self.pool)
            .await?;
            if combined.rows_affected() == 1 {
                return Ok(LockStatus::Combined);
            }
        }

        Ok(LockStatus::Wait)
    }

    async fn unlock(&self, name: &str) -> SchedulerResult<bool> {
        let result = sqlx::query("DELETE FROM cluster_lock WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn is_locked(&self, name: &str) -> SchedulerResult<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM cluster_lock WHERE name = $1 AND time_expired >= $2",
        )
        .bind(name)
        .bind(now_millis())
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.try_get("cnt")?;
        Ok(count > 0)
    }

    async fn get(&self, name: &str) -> SchedulerResult<Option<ClusterLock>> {
        let row = sqlx::query(
            "SELECT name, host, combine_count, time_locked, time_expired \
             FROM cluster_lock WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_lock).transpose()
    }

    /// 消费一次合并请求；没有待合并的请求时返回 false
    async fn combine(&self, name: &str) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE cluster_lock SET combine_count = combine_count - 1 \
             WHERE name = $1 AND combine_count > 0",
        )
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn clear_expired(&self, now: i64) -> SchedulerResult<u64> {
        let result = sqlx::query("DELETE FROM cluster_lock WHERE time_expired < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
