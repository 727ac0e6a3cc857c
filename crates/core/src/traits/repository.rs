//! 数据仓储层接口定义
//!
//! 每个实体一个仓储接口，全部为异步并返回 `SchedulerResult<T>`。
//!
//! ## 并发约定
//!
//! 所有状态迁移都是存储层的原子条件更新(`UPDATE ... WHERE id=? AND state=?`)，
//! 返回 `Ok(false)` 表示条件不满足(其他调度实例或Worker已先一步迁移了该记录)。
//! 这是预期内的竞争结果，调用方应静默跳过，而不是当作错误处理。
//!
//! 涉及多条语句的操作(例如任务状态迁移同时维护作业计数)在实现内部使用显式事务，
//! 调用方无需也无法跨仓储组合事务。

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Analyst, AnalystFilter, AnalystSpec, AnalystState, AssetStats, ClusterLock, ClusterLockSpec,
    Command, CommandSpec, CommandState, Depend, DependSpec, DependType, DispatchPriority, Job,
    JobFilter, JobSpec, JobState, JobUpdateSpec, LockState, LockStatus, Task, TaskError,
    TaskErrorFilter, TaskErrorSpec, TaskFilter, TaskSpec, TaskState, TaskStateCounts,
};
use crate::SchedulerResult;

/// 作业仓储
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// 创建作业及其计数/统计行，规格中的任务一并创建
    async fn create(&self, spec: &JobSpec) -> SchedulerResult<Job>;

    async fn get(&self, id: Uuid) -> SchedulerResult<Job>;

    async fn list(&self, filter: &JobFilter) -> SchedulerResult<Vec<Job>>;

    async fn update(&self, id: Uuid, spec: &JobUpdateSpec) -> SchedulerResult<bool>;

    /// 删除作业及其全部任务、依赖、错误与统计
    async fn delete(&self, id: Uuid) -> SchedulerResult<bool>;

    /// 条件更新作业状态；`old` 为 None 时无条件更新(但不会更新为相同状态)
    async fn set_state(
        &self,
        id: Uuid,
        new_state: JobState,
        old_state: Option<JobState>,
    ) -> SchedulerResult<bool>;

    /// 仅在开始时间未设置时记录开始时间
    async fn set_time_started(&self, id: Uuid) -> SchedulerResult<bool>;

    async fn set_paused(&self, id: Uuid, paused: bool, expires_at: i64) -> SchedulerResult<bool>;

    /// 恢复暂停期已过的作业，返回恢复数量
    async fn resume_paused(&self, now: i64) -> SchedulerResult<u64>;

    async fn get_counts(&self, id: Uuid) -> SchedulerResult<TaskStateCounts>;

    async fn get_stats(&self, id: Uuid) -> SchedulerResult<AssetStats>;

    /// 停止时间早于 `cutoff` 的已结束作业
    async fn get_expired(&self, cutoff: i64, limit: i64) -> SchedulerResult<Vec<Job>>;
}

/// 任务仓储
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(
        &self,
        job_id: Uuid,
        spec: &TaskSpec,
        parent_id: Option<Uuid>,
    ) -> SchedulerResult<Task>;

    async fn get(&self, id: Uuid) -> SchedulerResult<Task>;

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>>;

    /// 条件状态迁移，同一事务内维护作业计数并执行状态副作用
    async fn set_state(
        &self,
        id: Uuid,
        new_state: TaskState,
        old_state: Option<TaskState>,
    ) -> SchedulerResult<bool>;

    /// 将 Waiting 任务原子地领取为 Queued，记录Analyst地址并设置Analyst当前任务
    async fn queue(&self, id: Uuid, endpoint: &str) -> SchedulerResult<bool>;

    async fn set_exit_status(&self, id: Uuid, exit_status: i64) -> SchedulerResult<bool>;

    async fn set_progress(&self, id: Uuid, progress: i64) -> SchedulerResult<bool>;

    /// 运行次数未超过上限时可自动重试
    async fn is_auto_retryable(&self, id: Uuid, limit: i64) -> SchedulerResult<bool>;

    /// 仅当任务正在该Analyst上运行时刷新心跳时间
    async fn update_ping_time(&self, id: Uuid, endpoint: &str) -> SchedulerResult<bool>;

    /// 心跳早于 `cutoff` 的 Running/Queued 任务
    async fn get_orphans(&self, cutoff: i64, limit: i64) -> SchedulerResult<Vec<Task>>;

    /// 各项目等待中的任务数，升序
    async fn get_dispatch_priority(&self) -> SchedulerResult<Vec<DispatchPriority>>;

    /// 优先级不高于 `max_priority` 的作业中可分派的任务
    async fn get_waiting_by_job_priority(
        &self,
        max_priority: i64,
        limit: i64,
    ) -> SchedulerResult<Vec<Task>>;

    /// 某项目中可分派的任务
    async fn get_waiting_by_project(
        &self,
        project_id: Uuid,
        limit: i64,
    ) -> SchedulerResult<Vec<Task>>;

    async fn increment_stats(&self, id: Uuid, stats: &AssetStats) -> SchedulerResult<()>;

    async fn get_stats(&self, id: Uuid) -> SchedulerResult<AssetStats>;
}

/// Analyst仓储
#[async_trait]
pub trait AnalystRepository: Send + Sync {
    /// 按地址插入或更新，状态置为Up并刷新心跳
    async fn upsert(&self, spec: &AnalystSpec) -> SchedulerResult<Analyst>;

    async fn exists(&self, endpoint: &str) -> SchedulerResult<bool>;

    async fn get(&self, endpoint: &str) -> SchedulerResult<Analyst>;

    async fn list(&self, filter: &AnalystFilter) -> SchedulerResult<Vec<Analyst>>;

    async fn set_state(
        &self,
        id: Uuid,
        new_state: AnalystState,
        old_state: Option<AnalystState>,
    ) -> SchedulerResult<bool>;

    async fn set_lock_state(&self, endpoint: &str, state: LockState) -> SchedulerResult<bool>;

    async fn is_locked(&self, endpoint: &str) -> SchedulerResult<bool>;

    async fn set_task_id(&self, endpoint: &str, task_id: Option<Uuid>) -> SchedulerResult<bool>;

    /// 指定状态下心跳早于 `cutoff` 的Analyst
    async fn get_unresponsive(
        &self,
        state: AnalystState,
        cutoff: i64,
    ) -> SchedulerResult<Vec<Analyst>>;

    /// 删除 Down 状态的节点；节点已恢复为 Up 时不删除并返回 false
    async fn delete(&self, id: Uuid) -> SchedulerResult<bool>;
}

/// 依赖边仓储
#[async_trait]
pub trait DependRepository: Send + Sync {
    /// 插入Active边并增加被阻塞方的依赖计数；被依赖方已成功结束时返回 None
    async fn create(&self, spec: &DependSpec) -> SchedulerResult<Option<Depend>>;

    async fn get(&self, id: Uuid) -> SchedulerResult<Depend>;

    /// 解除Active边并减少依赖计数，返回实际解除的数量
    async fn resolve(&self, ids: &[Uuid]) -> SchedulerResult<u64>;

    /// 依赖 `dependee` 的Active边
    async fn get_dependents(
        &self,
        depend_type: DependType,
        dependee: Uuid,
    ) -> SchedulerResult<Vec<Depend>>;

    /// `depender` 依赖的Active边
    async fn get_dependencies(
        &self,
        depend_type: DependType,
        depender: Uuid,
    ) -> SchedulerResult<Vec<Depend>>;
}

/// 集群锁仓储
#[async_trait]
pub trait ClusterLockRepository: Send + Sync {
    async fn lock(&self, spec: &ClusterLockSpec, host: &str) -> SchedulerResult<LockStatus>;

    async fn unlock(&self, name: &str) -> SchedulerResult<bool>;

    async fn is_locked(&self, name: &str) -> SchedulerResult<bool>;

    async fn get(&self, name: &str) -> SchedulerResult<Option<ClusterLock>>;

    /// 消费一次挂起的合并请求
    async fn combine(&self, name: &str) -> SchedulerResult<bool>;

    /// 删除已过期的锁，返回删除数量
    async fn clear_expired(&self, now: i64) -> SchedulerResult<u64>;
}

/// 任务错误仓储
#[async_trait]
pub trait TaskErrorRepository: Send + Sync {
    async fn create(
        &self,
        task: &Task,
        endpoint: Option<&str>,
        spec: &TaskErrorSpec,
    ) -> SchedulerResult<TaskError>;

    /// 批量写入，返回写入条数
    async fn batch_create(
        &self,
        task: &Task,
        endpoint: Option<&str>,
        specs: &[TaskErrorSpec],
    ) -> SchedulerResult<u64>;

    async fn list(&self, filter: &TaskErrorFilter) -> SchedulerResult<Vec<TaskError>>;
}

/// 命令仓储
#[async_trait]
pub trait CommandRepository: Send + Sync {
    async fn create(&self, spec: &CommandSpec) -> SchedulerResult<Command>;

    async fn get(&self, id: Uuid) -> SchedulerResult<Command>;

    async fn set_state(
        &self,
        id: Uuid,
        new_state: CommandState,
        message: Option<&str>,
    ) -> SchedulerResult<bool>;
}
