use std::sync::Arc;

use taskfarm_core::{
    models::{Depend, DependSpec, DependType},
    traits::DependRepository,
    SchedulerResult,
};
use tracing::{debug, info};
use uuid::Uuid;

/// 作业与任务之间的依赖关系
pub struct DependService {
    depend_repo: Arc<dyn DependRepository>,
}

impl DependService {
    pub fn new(depend_repo: Arc<dyn DependRepository>) -> Self {
        Self { depend_repo }
    }

    /// 创建依赖；被依赖方已成功结束时返回 None
    pub async fn create(&self, spec: &DependSpec) -> SchedulerResult<Option<Depend>> {
        let depend = self.depend_repo.create(spec).await?;
        match &depend {
            Some(d) => info!("创建依赖 {} ({:?})", d.id, d.depend_type),
            None => debug!("被依赖方已完成，跳过依赖 {:?}", spec),
        }
        Ok(depend)
    }

    pub async fn get(&self, id: Uuid) -> SchedulerResult<Depend> {
        self.depend_repo.get(id).await
    }

    /// 解除一组依赖，返回实际解除的条数
    pub async fn resolve(&self, depends: &[Depend]) -> SchedulerResult<u64> {
        let ids: Vec<Uuid> = depends.iter().map(|d| d.id).collect();
        self.depend_repo.resolve(&ids).await
    }

    pub async fn resolve_on_task_success(&self, task_id: Uuid) -> SchedulerResult<u64> {
        let depends = self.what_depends_on_task(task_id).await?;
        if depends.is_empty() {
            return Ok(0);
        }
        let resolved = self.resolve(&depends).await?;
        debug!("任务 {} 完成，解除 {} 条依赖", task_id, resolved);
        Ok(resolved)
    }

    pub async fn resolve_on_job_success(&self, job_id: Uuid) -> SchedulerResult<u64> {
        let depends = self.what_depends_on_job(job_id).await?;
        if depends.is_empty() {
            return Ok(0);
        }
        let resolved = self.resolve(&depends).await?;
        info!("作业 {} 完成，解除 {} 条作业依赖", job_id, resolved);
        Ok(resolved)
    }

    pub async fn what_depends_on_job(&self, job_id: Uuid) -> SchedulerResult<Vec<Depend>> {
        self.depend_repo
            .get_dependents(DependType::JobOnJob, job_id)
            .await
    }

    pub async fn what_depends_on_task(&self, task_id: Uuid) -> SchedulerResult<Vec<Depend>> {
        self.depend_repo
            .get_dependents(DependType::TaskOnTask, task_id)
            .await
    }

    pub async fn what_job_depends_on(&self, job_id: Uuid) -> SchedulerResult<Vec<Depend>> {
        self.depend_repo
            .get_dependencies(DependType::JobOnJob, job_id)
            .await
    }

    pub async fn what_task_depends_on(&self, task_id: Uuid) -> SchedulerResult<Vec<Depend>> {
        self.depend_repo
            .get_dependencies(DependType::TaskOnTask, task_id)
            .await
    }
}
