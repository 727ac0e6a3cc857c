//! 作业与任务生命周期
//!
//! 所有状态迁移都通过存储层的条件更新完成。条件不满足说明其他实例或Analyst
//! 已经先一步迁移了记录，这里只记录 debug 日志并返回 false。

use std::sync::Arc;
use std::time::Duration;

use taskfarm_core::{
    models::{
        millis_after, now_millis, AssetStats, ExpandSpec, Job, JobFilter, JobResult, JobSpec,
        JobState, JobUpdateSpec, Task, TaskError, TaskErrorFilter, TaskErrorSpec, TaskFilter,
        TaskSpec, TaskState, TaskStateCounts,
    },
    traits::{AnalystClient, AnalystRepository, JobRepository, TaskErrorRepository, TaskRepository},
    SchedulerError, SchedulerResult,
};
use taskfarm_infrastructure::MetricsCollector;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::depend_service::DependService;
use crate::rendezvous::JobRendezvous;
use crate::stores::Stores;

pub const ORPHANED_TASK_REASON: &str = "Orphaned Task";

pub struct LifecycleManager {
    job_repo: Arc<dyn JobRepository>,
    task_repo: Arc<dyn TaskRepository>,
    analyst_repo: Arc<dyn AnalystRepository>,
    task_error_repo: Arc<dyn TaskErrorRepository>,
    depend_service: Arc<DependService>,
    analyst_client: Arc<dyn AnalystClient>,
    rendezvous: Arc<JobRendezvous>,
    metrics: MetricsCollector,
    auto_retry_limit: i64,
}

impl LifecycleManager {
    pub fn new(
        stores: &Stores,
        depend_service: Arc<DependService>,
        analyst_client: Arc<dyn AnalystClient>,
        rendezvous: Arc<JobRendezvous>,
        metrics: MetricsCollector,
        auto_retry_limit: i64,
    ) -> Self {
        Self {
            job_repo: stores.jobs.clone(),
            task_repo: stores.tasks.clone(),
            analyst_repo: stores.analysts.clone(),
            task_error_repo: stores.task_errors.clone(),
            depend_service,
            analyst_client,
            rendezvous,
            metrics,
            auto_retry_limit,
        }
    }

    // ---- 作业 ----

    pub async fn create_job(&self, spec: &JobSpec) -> SchedulerResult<Job> {
        self.job_repo.create(spec).await
    }

    pub async fn get_job(&self, id: Uuid) -> SchedulerResult<Job> {
        self.job_repo.get(id).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> SchedulerResult<Vec<Job>> {
        self.job_repo.list(filter).await
    }

    pub async fn update_job(&self, id: Uuid, spec: &JobUpdateSpec) -> SchedulerResult<Job> {
        if !self.job_repo.update(id, spec).await? {
            return Err(SchedulerError::JobNotFound { id });
        }
        self.job_repo.get(id).await
    }

    /// 删除作业；仍在Analyst上的任务先发送kill
    #[instrument(skip(self))]
    pub async fn delete_job(&self, id: Uuid) -> SchedulerResult<bool> {
        for task in self.dispatched_tasks(id).await? {
            self.kill_quietly(&task, "作业已删除").await;
        }
        let deleted = self.job_repo.delete(id).await?;
        if deleted {
            info!("删除作业 {}", id);
        }
        Ok(deleted)
    }

    /// 暂停作业；指定时长时到期后由维护循环自动恢复
    pub async fn pause_job(&self, id: Uuid, duration_seconds: Option<i64>) -> SchedulerResult<bool> {
        let expires_at = match duration_seconds {
            Some(seconds) if seconds <= 0 => {
                return Err(SchedulerError::InvalidArgument(format!(
                    "暂停时长必须大于0: {seconds}"
                )))
            }
            Some(seconds) => millis_after(now_millis(), seconds)?,
            None => -1,
        };
        self.job_repo.get(id).await?;
        self.job_repo.set_paused(id, true, expires_at).await
    }

    pub async fn resume_job(&self, id: Uuid) -> SchedulerResult<bool> {
        self.job_repo.get(id).await?;
        self.job_repo.set_paused(id, false, -1).await
    }

    /// 取消作业，所有已分派的任务被强制退回 Waiting
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, id: Uuid) -> SchedulerResult<bool> {
        if !self
            .job_repo
            .set_state(id, JobState::Cancelled, Some(JobState::InProgress))
            .await?
        {
            debug!("作业 {} 不在进行中，忽略取消", id);
            return Ok(false);
        }

        for task in self.dispatched_tasks(id).await? {
            if let Err(e) = self
                .force_transition(&task, TaskState::Waiting, None, "作业已取消")
                .await
            {
                error!("取消作业 {} 时退回任务 {} 出错: {}", id, task.id, e);
            }
        }

        info!("作业 {} 已取消", id);
        self.deliver_result(id, JobState::Cancelled).await;
        Ok(true)
    }

    pub async fn restart_job(&self, id: Uuid) -> SchedulerResult<bool> {
        let restarted = self
            .job_repo
            .set_state(id, JobState::InProgress, Some(JobState::Cancelled))
            .await?;
        if restarted {
            info!("作业 {} 已重新启动", id);
        }
        Ok(restarted)
    }

    /// 重试作业中所有失败的任务，返回重试数量
    #[instrument(skip(self))]
    pub async fn retry_all_failures(&self, job_id: Uuid) -> SchedulerResult<u64> {
        let failed = self
            .task_repo
            .list(&TaskFilter::for_job(job_id).with_states(vec![TaskState::Failure]))
            .await?;

        let mut retried = 0;
        for task in failed {
            if self
                .task_repo
                .set_state(task.id, TaskState::Waiting, Some(TaskState::Failure))
                .await?
            {
                self.metrics
                    .record_task_transition(TaskState::Failure, TaskState::Waiting);
                retried += 1;
            }
        }

        if retried > 0 {
            self.reopen_job(job_id).await?;
            info!("作业 {} 重试了 {} 个失败任务", job_id, retried);
        }
        Ok(retried)
    }

    /// 同步等待作业结束；已经结束的作业立即返回
    ///
    /// 先登记再读取作业状态，登记之后结束的作业一定能收到投递。
    pub async fn wait_for_job(
        &self,
        job_id: Uuid,
        timeout: Duration,
    ) -> SchedulerResult<Option<JobResult>> {
        let receiver = self.rendezvous.register(job_id).await?;

        let job = match self.job_repo.get(job_id).await {
            Ok(job) => job,
            Err(e) => {
                self.rendezvous.unregister(job_id).await;
                return Err(e);
            }
        };
        if job.state != JobState::InProgress {
            self.rendezvous.unregister(job_id).await;
            return Ok(Some(JobResult {
                job_id,
                state: job.state,
                counts: self.job_repo.get_counts(job_id).await?,
            }));
        }
        self.rendezvous
            .wait_registered(job_id, receiver, timeout)
            .await
    }

    // ---- 任务 ----

    pub async fn get_task(&self, id: Uuid) -> SchedulerResult<Task> {
        self.task_repo.get(id).await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        self.task_repo.list(filter).await
    }

    /// 重试任务：已分派的任务先kill再退回 Waiting
    #[instrument(skip(self))]
    pub async fn retry_task(&self, id: Uuid, reason: &str) -> SchedulerResult<bool> {
        let task = self.task_repo.get(id).await?;
        if task.state == TaskState::Waiting {
            return Ok(false);
        }

        let retried = self
            .force_transition(&task, TaskState::Waiting, None, reason)
            .await?;
        if retried {
            info!("任务 {} 重试: {}", id, reason);
            self.reopen_job(task.job_id).await?;
        }
        Ok(retried)
    }

    /// 回收孤儿任务：仅当任务仍处于扫描时看到的状态才退回 Waiting
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn reclaim_orphan(&self, task: &Task, reason: &str) -> SchedulerResult<bool> {
        if !task.state.is_dispatched() {
            return Ok(false);
        }

        let reclaimed = self
            .force_transition(task, TaskState::Waiting, Some(task.state), reason)
            .await?;
        if reclaimed {
            info!("任务 {} 重试: {}", task.id, reason);
            self.reopen_job(task.job_id).await?;
        }
        Ok(reclaimed)
    }

    /// 跳过任务：已分派的任务先kill再置为 Skipped
    #[instrument(skip(self))]
    pub async fn skip_task(&self, id: Uuid, reason: &str) -> SchedulerResult<bool> {
        let task = self.task_repo.get(id).await?;
        if task.state.is_finished() {
            return Ok(false);
        }

        let skipped = self
            .force_transition(&task, TaskState::Skipped, None, reason)
            .await?;
        if skipped {
            info!("任务 {} 已跳过: {}", id, reason);
            self.on_task_finished(&task, TaskState::Skipped).await?;
        }
        Ok(skipped)
    }

    /// Analyst开始执行任务
    #[instrument(skip(self))]
    pub async fn start_task(&self, id: Uuid, endpoint: &str) -> SchedulerResult<bool> {
        let task = self.task_repo.get(id).await?;
        if task.host.as_deref() != Some(endpoint) {
            warn!(
                "任务 {} 分派给 {:?}，但由 {} 报告开始",
                id, task.host, endpoint
            );
        }

        if !self
            .task_repo
            .set_state(id, TaskState::Running, Some(TaskState::Queued))
            .await?
        {
            debug!("任务 {} 不是 Queued 状态，忽略开始报告", id);
            return Ok(false);
        }

        self.metrics
            .record_task_transition(TaskState::Queued, TaskState::Running);
        self.job_repo.set_time_started(task.job_id).await?;
        Ok(true)
    }

    /// Analyst报告任务结束
    ///
    /// 退出码 0 为成功；非 0 时若不是人工kill且运行次数未超过上限则自动重试，否则失败。
    #[instrument(skip(self))]
    pub async fn stop_task(&self, id: Uuid, exit_status: i64, manual_kill: bool) -> SchedulerResult<bool> {
        let task = self.task_repo.get(id).await?;

        let new_state = if exit_status == 0 {
            TaskState::Success
        } else if !manual_kill && self.task_repo.is_auto_retryable(id, self.auto_retry_limit).await? {
            TaskState::Waiting
        } else {
            TaskState::Failure
        };

        let mut from = TaskState::Running;
        let mut stopped = self.task_repo.set_state(id, new_state, Some(from)).await?;
        if !stopped {
            from = TaskState::Queued;
            stopped = self.task_repo.set_state(id, new_state, Some(from)).await?;
        }
        if !stopped {
            debug!("任务 {} 已不在运行，忽略结束报告", id);
            return Ok(false);
        }

        self.metrics.record_task_transition(from, new_state);
        self.task_repo.set_exit_status(id, exit_status).await?;
        if let Some(host) = task.host.as_deref() {
            self.analyst_repo.set_task_id(host, None).await?;
        }

        match new_state {
            TaskState::Waiting => {
                info!("任务 {} 以退出码 {} 结束，自动重试", id, exit_status);
            }
            TaskState::Failure => {
                if !manual_kill {
                    let message = format!("任务以退出码 {exit_status} 结束，已达到重试上限");
                    self.task_error_repo
                        .create(&task, task.host.as_deref(), &TaskErrorSpec::fatal(message))
                        .await?;
                }
                self.on_task_finished(&task, new_state).await?;
            }
            _ => self.on_task_finished(&task, new_state).await?,
        }
        Ok(true)
    }

    /// Analyst拒绝已领取的任务，任务退回 Waiting
    #[instrument(skip(self))]
    pub async fn reject_task(&self, id: Uuid, reason: &str) -> SchedulerResult<bool> {
        let task = self.task_repo.get(id).await?;
        if !self
            .task_repo
            .set_state(id, TaskState::Waiting, Some(TaskState::Queued))
            .await?
        {
            return Ok(false);
        }

        self.metrics
            .record_task_transition(TaskState::Queued, TaskState::Waiting);
        if let Some(host) = task.host.as_deref() {
            self.analyst_repo.set_task_id(host, None).await?;
        }
        info!("任务 {} 被 {:?} 拒绝: {}", id, task.host, reason);
        Ok(true)
    }

    /// 在父任务所在作业中创建子任务
    pub async fn expand(&self, parent_id: Uuid, spec: &ExpandSpec) -> SchedulerResult<Task> {
        let parent = self.task_repo.get(parent_id).await?;
        let child_count = self
            .task_repo
            .list(&TaskFilter::for_job(parent.job_id))
            .await?
            .iter()
            .filter(|t| t.parent_id == Some(parent_id))
            .count();
        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-expand-{}", parent.name, child_count + 1));

        let task_spec = TaskSpec::new(name).with_script(spec.script.clone());
        let child = self
            .task_repo
            .create(parent.job_id, &task_spec, Some(parent_id))
            .await?;
        debug!("任务 {} 扩展出子任务 {}", parent_id, child.id);
        Ok(child)
    }

    pub async fn report_stats(&self, id: Uuid, stats: &AssetStats) -> SchedulerResult<()> {
        self.task_repo.increment_stats(id, stats).await
    }

    /// 只更新 Running 任务的进度
    pub async fn report_progress(&self, id: Uuid, progress: i64) -> SchedulerResult<bool> {
        self.task_repo.set_progress(id, progress).await
    }

    pub async fn report_errors(
        &self,
        id: Uuid,
        endpoint: Option<&str>,
        errors: &[TaskErrorSpec],
    ) -> SchedulerResult<u64> {
        let task = self.task_repo.get(id).await?;
        self.task_error_repo.batch_create(&task, endpoint, errors).await
    }

    pub async fn list_task_errors(&self, filter: &TaskErrorFilter) -> SchedulerResult<Vec<TaskError>> {
        self.task_error_repo.list(filter).await
    }

    pub async fn get_task_stats(&self, id: Uuid) -> SchedulerResult<AssetStats> {
        self.task_repo.get_stats(id).await
    }

    pub async fn get_job_stats(&self, id: Uuid) -> SchedulerResult<AssetStats> {
        self.job_repo.get_stats(id).await
    }

    pub async fn get_job_counts(&self, id: Uuid) -> SchedulerResult<TaskStateCounts> {
        self.job_repo.get_counts(id).await
    }

    // ---- 内部 ----

    async fn dispatched_tasks(&self, job_id: Uuid) -> SchedulerResult<Vec<Task>> {
        self.task_repo
            .list(
                &TaskFilter::for_job(job_id)
                    .with_states(vec![TaskState::Queued, TaskState::Running]),
            )
            .await
    }

    /// 迁移到目标状态，已分派的任务同时kill
    ///
    /// `expected` 为 `None` 时无条件迁移；否则只在状态仍为 `expected` 时迁移，迁移失败不kill。
    async fn force_transition(
        &self,
        task: &Task,
        new_state: TaskState,
        expected: Option<TaskState>,
        reason: &str,
    ) -> SchedulerResult<bool> {
        if expected.is_none() && task.state.is_dispatched() {
            self.kill_quietly(task, reason).await;
        }

        let changed = self.task_repo.set_state(task.id, new_state, expected).await?;
        if changed && expected.is_some() && task.state.is_dispatched() {
            self.kill_quietly(task, reason).await;
        }
        if changed {
            self.metrics.record_task_transition(task.state, new_state);
            if task.state.is_dispatched() {
                if let Some(host) = task.host.as_deref() {
                    self.analyst_repo.set_task_id(host, None).await?;
                }
            }
        }
        Ok(changed)
    }

    /// kill失败只记录日志
    async fn kill_quietly(&self, task: &Task, reason: &str) {
        let Some(host) = task.host.as_deref() else {
            return;
        };
        if let Err(e) = self.analyst_client.kill_task(host, task.id, reason).await {
            warn!("通知 {} 终止任务 {} 失败: {}", host, task.id, e);
        }
    }

    /// 已结束的作业因任务重试重新进入进行中
    async fn reopen_job(&self, job_id: Uuid) -> SchedulerResult<()> {
        let job = self.job_repo.get(job_id).await?;
        if matches!(job.state, JobState::Success | JobState::Failure)
            && self
                .job_repo
                .set_state(job_id, JobState::InProgress, Some(job.state))
                .await?
        {
            info!("作业 {} 因任务重试重新开始", job_id);
        }
        Ok(())
    }

    async fn on_task_finished(&self, task: &Task, new_state: TaskState) -> SchedulerResult<()> {
        if new_state.is_successful() {
            self.depend_service.resolve_on_task_success(task.id).await?;
        }
        self.check_job_finished(task.job_id).await?;
        Ok(())
    }

    /// 作业中没有未结束的任务时结束作业：有失败任务则 Failure，否则 Success
    pub async fn check_job_finished(&self, job_id: Uuid) -> SchedulerResult<Option<JobState>> {
        let counts = self.job_repo.get_counts(job_id).await?;
        if counts.pending() > 0 {
            return Ok(None);
        }

        let final_state = if counts.failure > 0 {
            JobState::Failure
        } else {
            JobState::Success
        };
        if !self
            .job_repo
            .set_state(job_id, final_state, Some(JobState::InProgress))
            .await?
        {
            return Ok(None);
        }

        info!("作业 {} 结束: {:?}", job_id, final_state);
        if final_state == JobState::Success {
            self.depend_service.resolve_on_job_success(job_id).await?;
        }
        self.deliver_result(job_id, final_state).await;
        Ok(Some(final_state))
    }

    async fn deliver_result(&self, job_id: Uuid, state: JobState) {
        let counts = match self.job_repo.get_counts(job_id).await {
            Ok(counts) => counts,
            Err(e) => {
                error!("读取作业 {} 计数失败: {}", job_id, e);
                return;
            }
        };
        let result = JobResult {
            job_id,
            state,
            counts,
        };
        if !self.rendezvous.deliver(result).await {
            debug!("作业 {} 没有同步等待者", job_id);
        }
    }
}
