//! 调度服务
//!
//! 任务分派、作业与任务生命周期、Analyst注册表、依赖、集群锁、维护循环与命令执行器。
//! 所有服务都是无状态的，多个实例通过共享存储中的条件更新协调。

pub mod analyst_registry;
pub mod cluster_lock;
pub mod command_executor;
pub mod depend_service;
pub mod dispatch;
pub mod lifecycle;
pub mod maintenance;
pub mod rendezvous;
pub mod stores;

pub use analyst_registry::AnalystRegistry;
pub use cluster_lock::ClusterLockExecutor;
pub use command_executor::CommandExecutor;
pub use depend_service::DependService;
pub use dispatch::Dispatcher;
pub use lifecycle::LifecycleManager;
pub use maintenance::{MaintenanceReport, MaintenanceService};
pub use rendezvous::JobRendezvous;
pub use stores::Stores;
