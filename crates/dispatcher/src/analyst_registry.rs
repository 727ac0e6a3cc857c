use std::sync::Arc;

use taskfarm_core::{
    models::{now_millis, Analyst, AnalystFilter, AnalystSpec, AnalystState, LockState},
    traits::{AnalystRepository, TaskRepository},
    SchedulerResult,
};
use taskfarm_infrastructure::MetricsCollector;
use tracing::{debug, error, info, warn};

/// Analyst节点注册表
///
/// 心跳即注册；长时间没有心跳的节点先标记为 Down，再经过更长时间后删除。
pub struct AnalystRegistry {
    analyst_repo: Arc<dyn AnalystRepository>,
    task_repo: Arc<dyn TaskRepository>,
    metrics: MetricsCollector,
}

impl AnalystRegistry {
    pub fn new(
        analyst_repo: Arc<dyn AnalystRepository>,
        task_repo: Arc<dyn TaskRepository>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            analyst_repo,
            task_repo,
            metrics,
        }
    }

    /// 处理心跳：按地址插入或更新节点，并刷新其正在运行任务的心跳时间
    pub async fn register(&self, spec: &AnalystSpec) -> SchedulerResult<Analyst> {
        let exists = self.analyst_repo.exists(&spec.endpoint).await?;
        let analyst = self.analyst_repo.upsert(spec).await?;
        self.metrics.record_analyst_ping();

        if let Some(task_id) = spec.task_id {
            if !self.task_repo.update_ping_time(task_id, &spec.endpoint).await? {
                debug!("任务 {} 不在 {} 上运行，忽略心跳", task_id, spec.endpoint);
            }
        }

        if exists {
            debug!("Analyst心跳: {}", analyst.endpoint);
        } else {
            info!("注册新的Analyst: {} (版本 {})", analyst.endpoint, analyst.version);
        }
        Ok(analyst)
    }

    pub async fn exists(&self, endpoint: &str) -> SchedulerResult<bool> {
        self.analyst_repo.exists(endpoint).await
    }

    pub async fn get(&self, endpoint: &str) -> SchedulerResult<Analyst> {
        self.analyst_repo.get(endpoint).await
    }

    pub async fn list(&self, filter: &AnalystFilter) -> SchedulerResult<Vec<Analyst>> {
        self.analyst_repo.list(filter).await
    }

    /// 锁定的节点不再领取新任务
    pub async fn set_lock_state(&self, endpoint: &str, state: LockState) -> SchedulerResult<bool> {
        // 不存在的节点直接报错
        self.analyst_repo.get(endpoint).await?;
        let changed = self.analyst_repo.set_lock_state(endpoint, state).await?;
        if changed {
            info!("Analyst {} 锁定状态变更为 {:?}", endpoint, state);
        }
        Ok(changed)
    }

    pub async fn is_locked(&self, endpoint: &str) -> SchedulerResult<bool> {
        self.analyst_repo.is_locked(endpoint).await
    }

    /// 把心跳超时的 Up 节点标记为 Down，返回被标记的节点
    pub async fn check_for_unresponsive(&self, timeout_seconds: i64) -> SchedulerResult<Vec<Analyst>> {
        let cutoff = now_millis().saturating_sub(timeout_seconds.saturating_mul(1000));
        let stale = self
            .analyst_repo
            .get_unresponsive(AnalystState::Up, cutoff)
            .await?;

        let mut marked = Vec::new();
        for analyst in stale {
            match self
                .analyst_repo
                .set_state(analyst.id, AnalystState::Down, Some(AnalystState::Up))
                .await
            {
                Ok(true) => {
                    warn!(
                        "Analyst {} 超过 {} 秒没有心跳，标记为Down",
                        analyst.endpoint, timeout_seconds
                    );
                    if let Err(e) = self.analyst_repo.set_task_id(&analyst.endpoint, None).await {
                        error!("清除Analyst {} 的任务时出错: {}", analyst.endpoint, e);
                    }
                    marked.push(analyst);
                }
                Ok(false) => {}
                Err(e) => error!("标记Analyst {} 为Down时出错: {}", analyst.endpoint, e),
            }
        }

        if !marked.is_empty() {
            self.metrics.record_analysts_marked_down(marked.len() as u64);
        }
        Ok(marked)
    }

    /// 删除 Down 状态超过指定时长的节点
    pub async fn remove_inactive(&self, timeout_seconds: i64) -> SchedulerResult<u64> {
        let cutoff = now_millis().saturating_sub(timeout_seconds.saturating_mul(1000));
        let inactive = self
            .analyst_repo
            .get_unresponsive(AnalystState::Down, cutoff)
            .await?;

        let mut removed = 0;
        for analyst in inactive {
            match self.analyst_repo.delete(analyst.id).await {
                Ok(true) => {
                    info!("删除长期失联的Analyst {}", analyst.endpoint);
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => error!("删除Analyst {} 时出错: {}", analyst.endpoint, e),
            }
        }

        if removed > 0 {
            self.metrics.record_analysts_removed(removed);
        }
        Ok(removed)
    }

    /// 刷新在线节点数指标
    pub async fn refresh_gauges(&self) -> SchedulerResult<()> {
        let up = self
            .analyst_repo
            .list(&AnalystFilter {
                state: Some(AnalystState::Up),
                ..Default::default()
            })
            .await?;
        self.metrics.update_analysts_up(up.len());
        Ok(())
    }
}
