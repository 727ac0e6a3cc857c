use thiserror::Error;
use uuid::Uuid;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("作业未找到: {id}")]
    JobNotFound { id: Uuid },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: Uuid },

    #[error("Analyst未找到: {endpoint}")]
    AnalystNotFound { endpoint: String },

    #[error("依赖关系未找到: {id}")]
    DependNotFound { id: Uuid },

    #[error("命令未找到: {id}")]
    CommandNotFound { id: Uuid },

    /// 提交时即可判定的非法输入，不会写入任何数据
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    #[error("状态不允许该操作: {0}")]
    InvalidState(String),

    #[error("无法连接Analyst {endpoint}: {message}")]
    AnalystUnreachable { endpoint: String, message: String },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl SchedulerError {
    /// 是否为找不到实体的错误
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SchedulerError::JobNotFound { .. }
                | SchedulerError::TaskNotFound { .. }
                | SchedulerError::AnalystNotFound { .. }
                | SchedulerError::DependNotFound { .. }
                | SchedulerError::CommandNotFound { .. }
        )
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
