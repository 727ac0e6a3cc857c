use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskSpec;

/// 作业状态
///
/// 存储序号: InProgress=0, Cancelled=1, Success=2, Archived=3, Failure=4。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobState {
    InProgress,
    Cancelled,
    Success,
    Archived,
    Failure,
}

ordinal_enum!(JobState {
    InProgress = 0,
    Cancelled = 1,
    Success = 2,
    Archived = 3,
    Failure = 4,
});

impl JobState {
    /// 进入该状态时需要记录停止时间
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            JobState::Success | JobState::Failure | JobState::Cancelled
        )
    }
}

/// 作业优先级常量，数值越小越先调度
pub struct JobPriority;

impl JobPriority {
    pub const REINDEX: i64 = -32000;
    pub const INTERACTIVE: i64 = 1;
    pub const STANDARD: i64 = 100;
}

/// 作业
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub project_id: Uuid,
    pub data_source_id: Option<Uuid>,
    pub name: String,
    pub state: JobState,
    pub priority: i64,
    pub paused: bool,
    pub time_pause_expired: i64,
    pub max_running_tasks: i64,
    pub depend_count: i64,
    pub args: serde_json::Value,
    pub env: HashMap<String, String>,
    pub time_created: i64,
    pub time_modified: i64,
    pub time_started: i64,
    pub time_stopped: i64,
}

/// 创建作业的规格
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobSpec {
    pub project_id: Uuid,
    #[serde(default)]
    pub data_source_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub paused: bool,
    /// 暂停时长，设置后作业在该时长过后由维护循环自动恢复
    #[serde(default)]
    pub pause_duration_seconds: Option<i64>,
    #[serde(default)]
    pub max_running_tasks: Option<i64>,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    /// 本作业依赖的其他作业
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
}

impl JobSpec {
    pub fn new(project_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            project_id,
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_max_running_tasks(mut self, max: i64) -> Self {
        self.max_running_tasks = Some(max);
        self
    }

    pub fn paused_for(mut self, seconds: i64) -> Self {
        self.paused = true;
        self.pause_duration_seconds = Some(seconds);
        self
    }
}

/// 作业更新规格，None 字段保持不变
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobUpdateSpec {
    pub name: Option<String>,
    pub priority: Option<i64>,
    pub paused: Option<bool>,
    pub time_pause_expired: Option<i64>,
    pub max_running_tasks: Option<i64>,
}

/// 作业过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    pub project_id: Option<Uuid>,
    pub states: Option<Vec<JobState>>,
    pub paused: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// 作业下各状态的任务计数(job_count)
///
/// `depend` 统计处于 Waiting 但仍被依赖阻塞的任务，与 `waiting` 互斥，
/// 因此七个计数之和始终等于 `total`。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskStateCounts {
    pub waiting: i64,
    pub running: i64,
    pub success: i64,
    pub failure: i64,
    pub skipped: i64,
    pub queued: i64,
    pub depend: i64,
    pub total: i64,
}

impl TaskStateCounts {
    pub fn sum(&self) -> i64 {
        self.waiting
            + self.running
            + self.success
            + self.failure
            + self.skipped
            + self.queued
            + self.depend
    }

    /// 尚未结束的任务数
    pub fn pending(&self) -> i64 {
        self.waiting + self.depend + self.queued + self.running
    }
}

/// 按项目聚合的等待任务数，用于公平调度
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchPriority {
    pub project_id: Uuid,
    pub priority: i64,
}

/// 作业结束结果，通过集合点投递给同步等待者
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub job_id: Uuid,
    pub state: JobState,
    pub counts: TaskStateCounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_ordinals_are_stable() {
        assert_eq!(JobState::InProgress.ordinal(), 0);
        assert_eq!(JobState::Cancelled.ordinal(), 1);
        assert_eq!(JobState::Success.ordinal(), 2);
        assert_eq!(JobState::Archived.ordinal(), 3);
        assert_eq!(JobState::Failure.ordinal(), 4);
        assert_eq!(JobState::from_ordinal(1).unwrap(), JobState::Cancelled);
        assert!(JobState::from_ordinal(-1).is_err());
    }

    #[test]
    fn test_counts_pending_includes_depend_bucket() {
        let counts = TaskStateCounts {
            waiting: 1,
            depend: 2,
            queued: 1,
            running: 1,
            success: 3,
            total: 8,
            ..Default::default()
        };
        assert_eq!(counts.pending(), 5);
        assert_eq!(counts.sum(), counts.total);
    }
}
