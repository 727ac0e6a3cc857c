use std::sync::Arc;
use std::time::Duration;

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use taskfarm_core::{
    config::DatabaseConfig,
    traits::{
        AnalystRepository, ClusterLockRepository, CommandRepository, DependRepository,
        JobRepository, TaskErrorRepository, TaskRepository,
    },
    SchedulerResult,
};
use tracing::{debug, info};

use super::{
    schema::SCHEMA, SqlxAnalystRepository, SqlxClusterLockRepository, SqlxCommandRepository,
    SqlxDependRepository, SqlxJobRepository, SqlxTaskErrorRepository, SqlxTaskRepository,
    DEFAULT_MAX_RUNNING_TASKS,
};

/// Database type detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DatabaseType::PostgreSQL
        } else {
            DatabaseType::SQLite
        }
    }
}

/// 统一数据库管理器
///
/// 根据URL选择 PostgreSQL 或 SQLite 驱动，所有仓储共享同一个连接池。
#[derive(Clone)]
pub struct DatabaseManager {
    pool: AnyPool,
    database_type: DatabaseType,
    default_max_running_tasks: i64,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        sqlx::any::install_default_drivers();

        let database_type = DatabaseType::from_url(&config.url);
        let mut options = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));

        // 内存库在连接关闭时即被销毁，必须保持连接常驻
        if config.url.contains(":memory:") {
            options = options.idle_timeout(None).max_lifetime(None);
        } else {
            options = options.idle_timeout(Duration::from_secs(config.idle_timeout_seconds));
        }

        let pool = options.connect(&config.url).await?;
        info!("数据库连接池已创建: {:?}", database_type);

        Ok(Self {
            pool,
            database_type,
            default_max_running_tasks: DEFAULT_MAX_RUNNING_TASKS,
        })
    }

    /// 内存SQLite，已完成建表
    pub async fn in_memory() -> SchedulerResult<Self> {
        let manager = Self::new(&DatabaseConfig::in_memory()).await?;
        manager.migrate().await?;
        Ok(manager)
    }

    /// 创建所有表和索引(幂等)
    pub async fn migrate(&self) -> SchedulerResult<()> {
        debug!("运行数据库迁移");
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// 作业未指定并发上限时使用的默认值
    pub fn with_default_max_running_tasks(mut self, max: i64) -> Self {
        self.default_max_running_tasks = max;
        self
    }

    pub fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn job_repository(&self) -> Arc<dyn JobRepository> {
        Arc::new(
            SqlxJobRepository::new(self.pool.clone())
                .with_default_max_running_tasks(self.default_max_running_tasks),
        )
    }

    pub fn task_repository(&self) -> Arc<dyn TaskRepository> {
        Arc::new(SqlxTaskRepository::new(self.pool.clone()))
    }

    pub fn analyst_repository(&self) -> Arc<dyn AnalystRepository> {
        Arc::new(SqlxAnalystRepository::new(self.pool.clone()))
    }

    pub fn depend_repository(&self) -> Arc<dyn DependRepository> {
        Arc::new(SqlxDependRepository::new(self.pool.clone()))
    }

    pub fn cluster_lock_repository(&self) -> Arc<dyn ClusterLockRepository> {
        Arc::new(SqlxClusterLockRepository::new(self.pool.clone()))
    }

    pub fn task_error_repository(&self) -> Arc<dyn TaskErrorRepository> {
        Arc::new(SqlxTaskErrorRepository::new(self.pool.clone()))
    }

    pub fn command_repository(&self) -> Arc<dyn CommandRepository> {
        Arc::new(SqlxCommandRepository::new(self.pool.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_from_url() {
        assert_eq!(
            DatabaseType::from_url("postgresql://localhost/taskfarm"),
            DatabaseType::PostgreSQL
        );
        assert_eq!(
            DatabaseType::from_url("postgres://localhost/taskfarm"),
            DatabaseType::PostgreSQL
        );
        assert_eq!(
            DatabaseType::from_url("sqlite::memory:"),
            DatabaseType::SQLite
        );
    }

    #[tokio::test]
    async fn test_in_memory_migrate_is_idempotent() {
        let manager = DatabaseManager::in_memory().await.unwrap();
        manager.migrate().await.unwrap();
        manager.health_check().await.unwrap();
    }
}
