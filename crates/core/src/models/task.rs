use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务状态
///
/// 存储序号: Waiting=0, Running=1, Success=2, Failure=3, Skipped=4, Queued=5。
/// 依赖阻塞(Depend)不是独立的存储状态，而是 depend_count > 0 的 Waiting 任务。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskState {
    Waiting,
    Running,
    Success,
    Failure,
    Skipped,
    Queued,
}

ordinal_enum!(TaskState {
    Waiting = 0,
    Running = 1,
    Success = 2,
    Failure = 3,
    Skipped = 4,
    Queued = 5,
});

impl TaskState {
    /// 已分派给某个Analyst(需要kill信号才能停止)
    pub fn is_dispatched(self) -> bool {
        matches!(self, TaskState::Running | TaskState::Queued)
    }

    /// 终态
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failure | TaskState::Skipped
        )
    }

    /// 视为成功完成的终态，可解除依赖
    pub fn is_successful(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Skipped)
    }
}

/// 任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub job_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub state: TaskState,
    pub host: Option<String>,
    pub run_count: i64,
    pub progress: i64,
    pub exit_status: i64,
    pub script: serde_json::Value,
    pub depend_count: i64,
    pub time_created: i64,
    pub time_modified: i64,
    pub time_started: i64,
    pub time_stopped: i64,
    pub time_ping: i64,
}

impl Task {
    /// 是否满足分派条件(仅针对任务本身，作业条件由存储层查询保证)
    pub fn is_dispatchable(&self) -> bool {
        self.state == TaskState::Waiting && self.depend_count == 0
    }
}

/// 创建任务的规格
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default)]
    pub script: serde_json::Value,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: serde_json::Value::Null,
        }
    }

    pub fn with_script(mut self, script: serde_json::Value) -> Self {
        self.script = script;
        self
    }
}

/// 动态扩展请求：在运行中的任务下创建子任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpandSpec {
    pub name: Option<String>,
    pub script: serde_json::Value,
}

/// 下发给Analyst的任务启动信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStart {
    pub task_id: Uuid,
    pub job_id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub script: serde_json::Value,
    pub env: std::collections::HashMap<String, String>,
    pub args: serde_json::Value,
}

/// 任务过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    pub job_id: Option<Uuid>,
    pub states: Option<Vec<TaskState>>,
    pub host: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TaskFilter {
    pub fn for_job(job_id: Uuid) -> Self {
        Self {
            job_id: Some(job_id),
            ..Default::default()
        }
    }

    pub fn with_states(mut self, states: Vec<TaskState>) -> Self {
        self.states = Some(states);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_ordinals_are_stable() {
        let expected = [
            (TaskState::Waiting, 0),
            (TaskState::Running, 1),
            (TaskState::Success, 2),
            (TaskState::Failure, 3),
            (TaskState::Skipped, 4),
            (TaskState::Queued, 5),
        ];
        for (state, ordinal) in expected {
            assert_eq!(state.ordinal(), ordinal);
            assert_eq!(TaskState::from_ordinal(ordinal).unwrap(), state);
        }
        assert!(TaskState::from_ordinal(6).is_err());
    }

    #[test]
    fn test_task_state_groups() {
        assert!(TaskState::Queued.is_dispatched());
        assert!(TaskState::Running.is_dispatched());
        assert!(!TaskState::Waiting.is_dispatched());

        assert!(TaskState::Skipped.is_finished());
        assert!(TaskState::Skipped.is_successful());
        assert!(TaskState::Failure.is_finished());
        assert!(!TaskState::Failure.is_successful());
    }
}
