//! 任务分派
//!
//! Analyst拉取任务时先处理交互优先级的作业，再按项目公平地轮询：
//! 等待任务越少的项目越先被考虑，避免大项目独占集群。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use taskfarm_core::{
    config::DispatcherConfig,
    models::{DispatchPriority, Job, JobPriority, Task, TaskStart},
    traits::{AnalystRepository, JobRepository, TaskRepository},
    SchedulerResult,
};
use taskfarm_infrastructure::MetricsCollector;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::stores::Stores;

#[derive(Default)]
struct DispatchOutcome {
    polled: u64,
    collisions: u64,
}

pub struct Dispatcher {
    job_repo: Arc<dyn JobRepository>,
    task_repo: Arc<dyn TaskRepository>,
    analyst_repo: Arc<dyn AnalystRepository>,
    metrics: MetricsCollector,
    config: DispatcherConfig,
    priority_cache: Mutex<Option<(Instant, Vec<DispatchPriority>)>>,
}

impl Dispatcher {
    pub fn new(stores: &Stores, metrics: MetricsCollector, config: DispatcherConfig) -> Self {
        Self {
            job_repo: stores.jobs.clone(),
            task_repo: stores.tasks.clone(),
            analyst_repo: stores.analysts.clone(),
            metrics,
            config,
            priority_cache: Mutex::new(None),
        }
    }

    /// 为Analyst领取至多 `max_count` 个任务
    #[instrument(skip(self))]
    pub async fn get_next(&self, endpoint: &str, max_count: usize) -> SchedulerResult<Vec<Task>> {
        let started = Instant::now();
        let max_count = max_count.min(self.config.max_tasks_per_request.max(0) as usize);
        let mut queued = Vec::new();
        let mut outcome = DispatchOutcome::default();

        if max_count == 0 {
            return Ok(queued);
        }
        if self.analyst_repo.is_locked(endpoint).await? {
            debug!("Analyst {} 已锁定，不分派任务", endpoint);
            return Ok(queued);
        }

        let interactive = self
            .task_repo
            .get_waiting_by_job_priority(JobPriority::INTERACTIVE, self.config.poll_count)
            .await?;
        self.claim(endpoint, interactive, max_count, &mut queued, &mut outcome)
            .await?;

        if queued.len() < max_count {
            for priority in self.dispatch_priority().await? {
                let candidates = self
                    .task_repo
                    .get_waiting_by_project(priority.project_id, self.config.poll_count)
                    .await?;
                self.claim(endpoint, candidates, max_count, &mut queued, &mut outcome)
                    .await?;
                if queued.len() >= max_count {
                    break;
                }
            }
        }

        self.metrics.record_dispatch(
            outcome.polled,
            queued.len() as u64,
            outcome.collisions,
            started.elapsed().as_secs_f64(),
        );
        Ok(queued)
    }

    /// 领取任务并附带作业信息，供Analyst直接启动
    pub async fn queue_pending_tasks(
        &self,
        endpoint: &str,
        max_count: usize,
    ) -> SchedulerResult<Vec<TaskStart>> {
        let tasks = self.get_next(endpoint, max_count).await?;

        let mut jobs: HashMap<Uuid, Job> = HashMap::new();
        let mut starts = Vec::with_capacity(tasks.len());
        for task in tasks {
            if !jobs.contains_key(&task.job_id) {
                let job = self.job_repo.get(task.job_id).await?;
                jobs.insert(task.job_id, job);
            }
            let Some(job) = jobs.get(&task.job_id) else {
                continue;
            };
            starts.push(TaskStart {
                task_id: task.id,
                job_id: job.id,
                project_id: job.project_id,
                name: task.name,
                script: task.script,
                env: job.env.clone(),
                args: job.args.clone(),
            });
        }
        Ok(starts)
    }

    async fn claim(
        &self,
        endpoint: &str,
        candidates: Vec<Task>,
        max_count: usize,
        queued: &mut Vec<Task>,
        outcome: &mut DispatchOutcome,
    ) -> SchedulerResult<()> {
        for task in candidates {
            if queued.len() >= max_count {
                break;
            }
            outcome.polled += 1;
            if self.task_repo.queue(task.id, endpoint).await? {
                debug!("任务 {} 分派给 {}", task.id, endpoint);
                queued.push(self.task_repo.get(task.id).await?);
            } else {
                outcome.collisions += 1;
            }
        }
        Ok(())
    }

    /// 各项目的分派顺序，在内存中缓存一段时间
    async fn dispatch_priority(&self) -> SchedulerResult<Vec<DispatchPriority>> {
        let ttl = Duration::from_secs(self.config.priority_cache_seconds);
        let mut cache = self.priority_cache.lock().await;

        if let Some((loaded, priorities)) = cache.as_ref() {
            if loaded.elapsed() < ttl {
                return Ok(priorities.clone());
            }
        }

        let priorities = self.task_repo.get_dispatch_priority().await?;
        *cache = Some((Instant::now(), priorities.clone()));
        Ok(priorities)
    }

    /// 使缓存的项目顺序失效
    pub async fn invalidate_priority_cache(&self) {
        *self.priority_cache.lock().await = None;
    }
}
