use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use taskfarm_core::{
    config::MaintenanceConfig,
    models::{now_millis, ClusterLockSpec},
    traits::{JobRepository, TaskRepository},
    SchedulerResult,
};
use taskfarm_infrastructure::MetricsCollector;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info};

use crate::analyst_registry::AnalystRegistry;
use crate::cluster_lock::ClusterLockExecutor;
use crate::lifecycle::{LifecycleManager, ORPHANED_TASK_REASON};
use crate::stores::Stores;

pub const MAINTENANCE_LOCK: &str = "maintenance";

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// 一次维护的处理结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub orphans_retried: u64,
    pub analysts_marked_down: u64,
    pub analysts_removed: u64,
    pub jobs_archived: u64,
    pub locks_cleared: u64,
}

/// 维护循环：回收孤儿任务、清理失联Analyst、归档过期作业、恢复到期的暂停作业
///
/// 多个调度实例同时运行时，由集群锁保证同一时刻只有一个实例执行维护。
pub struct MaintenanceService {
    job_repo: Arc<dyn JobRepository>,
    task_repo: Arc<dyn TaskRepository>,
    lifecycle: Arc<LifecycleManager>,
    analyst_registry: Arc<AnalystRegistry>,
    lock_executor: Arc<ClusterLockExecutor>,
    metrics: MetricsCollector,
    config: MaintenanceConfig,
    running: Arc<RwLock<bool>>,
}

impl MaintenanceService {
    pub fn new(
        stores: &Stores,
        lifecycle: Arc<LifecycleManager>,
        analyst_registry: Arc<AnalystRegistry>,
        lock_executor: Arc<ClusterLockExecutor>,
        metrics: MetricsCollector,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            job_repo: stores.jobs.clone(),
            task_repo: stores.tasks.clone(),
            lifecycle,
            analyst_registry,
            lock_executor,
            metrics,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// 运行维护循环，直到收到停止信号
    pub async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> SchedulerResult<()> {
        {
            let mut running = self.running.write().await;
            *running = true;
        }
        info!("启动维护循环");

        let initial_delay = if self.config.initial_delay_max_millis > 0 {
            rand::rng().random_range(0..self.config.initial_delay_max_millis)
        } else {
            0
        };
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(initial_delay)) => {}
            _ = shutdown.recv() => {
                info!("收到停止信号，退出维护循环");
                *self.running.write().await = false;
                return Ok(());
            }
        }

        let interval = Duration::from_millis(self.config.interval_millis);
        let resume_interval = Duration::from_secs(self.config.resume_paused_interval_seconds);
        let mut last_resume: Option<Instant> = None;

        loop {
            if !*self.running.read().await {
                info!("维护循环已停止");
                break;
            }

            if last_resume.is_none_or(|at| at.elapsed() >= resume_interval) {
                if let Err(e) = self.resume_paused_jobs().await {
                    error!("恢复暂停作业时出错: {}", e);
                }
                last_resume = Some(Instant::now());
            }

            match self.run_once().await {
                Ok(Some(report)) if report != MaintenanceReport::default() => {
                    info!("维护完成: {:?}", report);
                }
                Ok(Some(_)) => {}
                Ok(None) => debug!("其他实例正在执行维护，跳过本轮"),
                Err(e) => error!("执行维护时出错: {}", e),
            }

            // 固定间隔，上一轮结束后才开始计时
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.recv() => {
                    info!("收到停止信号，退出维护循环");
                    break;
                }
            }
        }

        *self.running.write().await = false;
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 在集群锁保护下执行一轮维护；其他实例持有锁时返回 None
    pub async fn run_once(&self) -> SchedulerResult<Option<MaintenanceReport>> {
        let spec =
            ClusterLockSpec::soft_lock(MAINTENANCE_LOCK).with_timeout(self.config.lock_timeout_seconds);
        self.lock_executor.inline(&spec, || self.run_checks()).await
    }

    /// 依次执行各项检查，单项失败不影响其他检查
    async fn run_checks(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.reclaim_orphans().await {
            Ok(count) => report.orphans_retried = count,
            Err(e) => error!("回收孤儿任务时出错: {}", e),
        }

        match self
            .analyst_registry
            .check_for_unresponsive(self.config.analyst_down_timeout_seconds)
            .await
        {
            Ok(marked) => report.analysts_marked_down = marked.len() as u64,
            Err(e) => error!("检查失联Analyst时出错: {}", e),
        }

        match self
            .analyst_registry
            .remove_inactive(self.config.analyst_remove_timeout_seconds)
            .await
        {
            Ok(removed) => report.analysts_removed = removed,
            Err(e) => error!("删除失联Analyst时出错: {}", e),
        }

        match self.archive_expired_jobs().await {
            Ok(count) => report.jobs_archived = count,
            Err(e) => error!("归档过期作业时出错: {}", e),
        }

        if let Err(e) = self.analyst_registry.refresh_gauges().await {
            error!("刷新Analyst指标时出错: {}", e);
        }

        report.locks_cleared = self.lock_executor.clear_expired().await;
        report
    }

    /// 心跳超时的 Running/Queued 任务退回 Waiting
    pub async fn reclaim_orphans(&self) -> SchedulerResult<u64> {
        let cutoff = now_millis()
            .saturating_sub(self.config.orphan_task_timeout_seconds.saturating_mul(1000));
        let orphans = self
            .task_repo
            .get_orphans(cutoff, self.config.orphan_batch_size)
            .await?;

        let mut retried = 0;
        for task in orphans {
            match self.lifecycle.reclaim_orphan(&task, ORPHANED_TASK_REASON).await {
                Ok(true) => {
                    info!("回收孤儿任务 {} (主机 {:?})", task.id, task.host);
                    retried += 1;
                }
                Ok(false) => {}
                Err(e) => error!("回收孤儿任务 {} 时出错: {}", task.id, e),
            }
        }

        if retried > 0 {
            self.metrics.record_orphans_recovered(retried);
        }
        Ok(retried)
    }

    /// 删除结束时间超过保留期的作业
    pub async fn archive_expired_jobs(&self) -> SchedulerResult<u64> {
        let cutoff = now_millis()
            .saturating_sub(self.config.archive_jobs_after_days.saturating_mul(DAY_MILLIS));
        let expired = self
            .job_repo
            .get_expired(cutoff, self.config.expired_job_batch_size)
            .await?;

        let mut archived = 0;
        for job in expired {
            match self.job_repo.delete(job.id).await {
                Ok(true) => {
                    debug!("归档过期作业 {} ({})", job.name, job.id);
                    archived += 1;
                }
                Ok(false) => {}
                Err(e) => error!("归档作业 {} 时出错: {}", job.id, e),
            }
        }

        if archived > 0 {
            self.metrics.record_jobs_archived(archived);
        }
        Ok(archived)
    }

    /// 恢复暂停期已过的作业
    pub async fn resume_paused_jobs(&self) -> SchedulerResult<u64> {
        let resumed = self.job_repo.resume_paused(now_millis()).await?;
        if resumed > 0 {
            info!("恢复了 {} 个暂停到期的作业", resumed);
            self.metrics.record_jobs_resumed(resumed);
        }
        Ok(resumed)
    }
}
