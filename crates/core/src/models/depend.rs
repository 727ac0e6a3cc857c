use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 依赖类型: JobOnJob=0, TaskOnTask=1
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DependType {
    JobOnJob,
    TaskOnTask,
}

ordinal_enum!(DependType {
    JobOnJob = 0,
    TaskOnTask = 1
});

/// 依赖边状态: Active=0, Inactive=1
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DependState {
    Active,
    Inactive,
}

ordinal_enum!(DependState {
    Active = 0,
    Inactive = 1
});

/// 阻塞依赖边：depender 在 dependee 成功完成前不可分派
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Depend {
    pub id: Uuid,
    pub depend_type: DependType,
    pub state: DependState,
    pub depender_job_id: Uuid,
    pub dependee_job_id: Uuid,
    pub depender_task_id: Option<Uuid>,
    pub dependee_task_id: Option<Uuid>,
    pub time_created: i64,
    pub time_modified: i64,
}

impl Depend {
    /// 被阻塞一方的ID(作业或任务)
    pub fn depender_id(&self) -> Uuid {
        match self.depend_type {
            DependType::JobOnJob => self.depender_job_id,
            DependType::TaskOnTask => self.depender_task_id.unwrap_or(self.depender_job_id),
        }
    }
}

/// 创建依赖边的规格
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DependSpec {
    JobOnJob { depender: Uuid, dependee: Uuid },
    TaskOnTask { depender: Uuid, dependee: Uuid },
}

impl DependSpec {
    pub fn depend_type(&self) -> DependType {
        match self {
            DependSpec::JobOnJob { .. } => DependType::JobOnJob,
            DependSpec::TaskOnTask { .. } => DependType::TaskOnTask,
        }
    }
}
