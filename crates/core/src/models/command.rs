use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{SchedulerError, SchedulerResult};

/// 命令状态: Waiting=0, Running=1, Finished=2, Cancelled=3, Failure=4
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CommandState {
    Waiting,
    Running,
    Finished,
    Cancelled,
    Failure,
}

ordinal_enum!(CommandState {
    Waiting = 0,
    Running = 1,
    Finished = 2,
    Cancelled = 3,
    Failure = 4,
});

/// 参数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Uuid,
    Integer,
}

impl ArgKind {
    fn accepts(self, value: &serde_json::Value) -> bool {
        match self {
            ArgKind::Uuid => value
                .as_str()
                .map(|s| Uuid::parse_str(s).is_ok())
                .unwrap_or(false),
            ArgKind::Integer => value.as_i64().is_some(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            ArgKind::Uuid => "uuid",
            ArgKind::Integer => "integer",
        }
    }
}

/// 可提交到本地命令执行器的命令类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CommandType {
    RetryAllFailures,
    CancelJob,
    RestartJob,
    SetJobPriority,
    SetMaxRunningTasks,
    DeleteJob,
}

impl CommandType {
    /// 各命令期望的参数类型列表
    pub fn arg_kinds(self) -> &'static [ArgKind] {
        match self {
            CommandType::RetryAllFailures
            | CommandType::CancelJob
            | CommandType::RestartJob
            | CommandType::DeleteJob => &[ArgKind::Uuid],
            CommandType::SetJobPriority | CommandType::SetMaxRunningTasks => {
                &[ArgKind::Uuid, ArgKind::Integer]
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandType::RetryAllFailures => "RetryAllFailures",
            CommandType::CancelJob => "CancelJob",
            CommandType::RestartJob => "RestartJob",
            CommandType::SetJobPriority => "SetJobPriority",
            CommandType::SetMaxRunningTasks => "SetMaxRunningTasks",
            CommandType::DeleteJob => "DeleteJob",
        }
    }

    pub fn parse(value: &str) -> SchedulerResult<Self> {
        match value {
            "RetryAllFailures" => Ok(CommandType::RetryAllFailures),
            "CancelJob" => Ok(CommandType::CancelJob),
            "RestartJob" => Ok(CommandType::RestartJob),
            "SetJobPriority" => Ok(CommandType::SetJobPriority),
            "SetMaxRunningTasks" => Ok(CommandType::SetMaxRunningTasks),
            "DeleteJob" => Ok(CommandType::DeleteJob),
            other => Err(SchedulerError::Serialization(format!(
                "未知的命令类型: {other}"
            ))),
        }
    }
}

/// 命令提交规格
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandSpec {
    pub command_type: CommandType,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

impl CommandSpec {
    pub fn new(command_type: CommandType, args: Vec<serde_json::Value>) -> Self {
        Self { command_type, args }
    }

    /// 校验参数个数与类型
    pub fn validate(&self) -> SchedulerResult<()> {
        let kinds = self.command_type.arg_kinds();
        if kinds.len() != self.args.len() {
            return Err(SchedulerError::InvalidArgument(format!(
                "命令 {} 需要 {} 个参数，实际为 {}",
                self.command_type.as_str(),
                kinds.len(),
                self.args.len()
            )));
        }
        for (index, (kind, value)) in kinds.iter().zip(&self.args).enumerate() {
            if !kind.accepts(value) {
                return Err(SchedulerError::InvalidArgument(format!(
                    "命令 {} 的第 {} 个参数应为 {}，实际为 {}",
                    self.command_type.as_str(),
                    index + 1,
                    kind.name(),
                    value
                )));
            }
        }
        Ok(())
    }
}

/// 已持久化的命令
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    pub id: Uuid,
    pub command_type: CommandType,
    pub args: Vec<serde_json::Value>,
    pub state: CommandState,
    pub message: Option<String>,
    pub time_created: i64,
    pub time_started: i64,
    pub time_stopped: i64,
}

impl Command {
    pub fn uuid_arg(&self, index: usize) -> SchedulerResult<Uuid> {
        self.args
            .get(index)
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| {
                SchedulerError::InvalidArgument(format!("第 {} 个参数不是有效的UUID", index + 1))
            })
    }

    pub fn int_arg(&self, index: usize) -> SchedulerResult<i64> {
        self.args
            .get(index)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| {
                SchedulerError::InvalidArgument(format!("第 {} 个参数不是整数", index + 1))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_accepts_matching_args() {
        let spec = CommandSpec::new(
            CommandType::SetJobPriority,
            vec![json!(Uuid::now_v7().to_string()), json!(5)],
        );
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_wrong_arg_count() {
        let spec = CommandSpec::new(CommandType::CancelJob, vec![]);
        let err = spec.validate().unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidArgument(_)));
    }

    #[test]
    fn test_validate_rejects_mismatched_types() {
        let spec = CommandSpec::new(
            CommandType::SetMaxRunningTasks,
            vec![json!(Uuid::now_v7().to_string()), json!("ten")],
        );
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("integer"));

        let spec = CommandSpec::new(CommandType::DeleteJob, vec![json!(42)]);
        assert!(spec.validate().is_err());
    }
}
