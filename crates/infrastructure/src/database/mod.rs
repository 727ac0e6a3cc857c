//! SQL存储层
//!
//! 所有仓储共享一个 `AnyPool`，同一套语句同时运行在 PostgreSQL 与 SQLite 上。

mod counters;
mod mapping;
mod schema;

pub mod analyst_repository;
pub mod cluster_lock_repository;
pub mod command_repository;
pub mod depend_repository;
pub mod job_repository;
pub mod manager;
pub mod task_error_repository;
pub mod task_repository;

pub use analyst_repository::SqlxAnalystRepository;
pub use cluster_lock_repository::SqlxClusterLockRepository;
pub use command_repository::SqlxCommandRepository;
pub use depend_repository::SqlxDependRepository;
pub use job_repository::{SqlxJobRepository, DEFAULT_MAX_RUNNING_TASKS};
pub use manager::{DatabaseManager, DatabaseType};
pub use task_error_repository::SqlxTaskErrorRepository;
pub use task_repository::SqlxTaskRepository;
