//! # 数据模型
//!
//! 调度系统的核心实体：作业(Job)、任务(Task)、Analyst工作节点、依赖边(Depend)、
//! 集群锁(ClusterLock)、任务错误记录(TaskError)以及本地命令(Command)。
//!
//! ## 存储约定
//!
//! - 所有实体ID均为按时间排序的UUID (v7)，以文本形式存储
//! - 所有时间字段为毫秒级Unix时间戳，`-1` 表示未设置
//! - 所有状态枚举以固定的小整数(序号)存储，映射关系见各枚举定义
//!
//! ```rust
//! use taskfarm_core::models::{TaskState, JobState};
//!
//! assert_eq!(TaskState::Queued.ordinal(), 5);
//! assert_eq!(JobState::from_ordinal(4).unwrap(), JobState::Failure);
//! ```

use uuid::Uuid;

/// 为序号存储的状态枚举生成 `ordinal` / `from_ordinal`
macro_rules! ordinal_enum {
    ($name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        impl $name {
            /// 存储使用的固定序号
            pub fn ordinal(self) -> i64 {
                match self {
                    $($name::$variant => $value,)+
                }
            }

            /// 从存储序号还原
            pub fn from_ordinal(value: i64) -> $crate::SchedulerResult<Self> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err($crate::SchedulerError::Serialization(format!(
                        concat!("无效的", stringify!($name), "序号: {}"),
                        other
                    ))),
                }
            }
        }
    };
}

pub mod analyst;
pub mod cluster_lock;
pub mod command;
pub mod depend;
pub mod job;
pub mod stats;
pub mod task;
pub mod task_error;

pub use analyst::{Analyst, AnalystFilter, AnalystSpec, AnalystState, LockState};
pub use cluster_lock::{ClusterLock, ClusterLockSpec, LockStatus};
pub use command::{ArgKind, Command, CommandSpec, CommandState, CommandType};
pub use depend::{Depend, DependSpec, DependState, DependType};
pub use job::{
    DispatchPriority, Job, JobFilter, JobPriority, JobResult, JobSpec, JobState, JobUpdateSpec,
    TaskStateCounts,
};
pub use stats::AssetStats;
pub use task::{ExpandSpec, Task, TaskFilter, TaskSpec, TaskStart, TaskState};
pub use task_error::{TaskError, TaskErrorFilter, TaskErrorSpec};

/// 当前毫秒时间戳
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 生成按时间排序的实体ID
pub fn new_id() -> Uuid {
    Uuid::now_v7()
}

/// `now` 之后 `seconds` 秒的毫秒时间戳；溢出时返回 `InvalidArgument`
pub fn millis_after(now: i64, seconds: i64) -> crate::SchedulerResult<i64> {
    seconds
        .checked_mul(1000)
        .and_then(|millis| now.checked_add(millis))
        .ok_or_else(|| crate::SchedulerError::InvalidArgument(format!("时长超出范围: {seconds}秒")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_after() {
        assert_eq!(millis_after(1_000, 5).unwrap(), 6_000);
        assert!(matches!(
            millis_after(now_millis(), i64::MAX / 100),
            Err(crate::SchedulerError::InvalidArgument(_))
        ));
        assert!(millis_after(i64::MAX - 10, 1).is_err());
    }
}
