use std::sync::Arc;

use taskfarm_core::traits::{
    AnalystRepository, ClusterLockRepository, CommandRepository, DependRepository, JobRepository,
    TaskErrorRepository, TaskRepository,
};
use taskfarm_infrastructure::DatabaseManager;

/// 各服务共享的仓储集合
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub analysts: Arc<dyn AnalystRepository>,
    pub depends: Arc<dyn DependRepository>,
    pub cluster_locks: Arc<dyn ClusterLockRepository>,
    pub task_errors: Arc<dyn TaskErrorRepository>,
    pub commands: Arc<dyn CommandRepository>,
}

impl Stores {
    pub fn from_database(db: &DatabaseManager) -> Self {
        Self {
            jobs: db.job_repository(),
            tasks: db.task_repository(),
            analysts: db.analyst_repository(),
            depends: db.depend_repository(),
            cluster_locks: db.cluster_lock_repository(),
            task_errors: db.task_error_repository(),
            commands: db.command_repository(),
        }
    }
}
