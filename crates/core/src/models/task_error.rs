use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务执行过程中上报的结构化错误
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskError {
    pub id: Uuid,
    pub task_id: Uuid,
    pub job_id: Uuid,
    pub endpoint: Option<String>,
    pub message: String,
    pub path: Option<String>,
    pub processor: Option<String>,
    pub phase: Option<String>,
    pub fatal: bool,
    pub stack_trace: Vec<String>,
    pub time_created: i64,
}

/// Analyst上报的错误
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TaskErrorSpec {
    pub message: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub processor: Option<String>,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub fatal: bool,
    #[serde(default)]
    pub stack_trace: Vec<String>,
}

impl TaskErrorSpec {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskErrorFilter {
    pub job_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub limit: Option<i64>,
}
