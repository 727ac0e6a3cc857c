use async_trait::async_trait;
use uuid::Uuid;

use crate::SchedulerResult;

/// 调度器主动调用Analyst的接口
///
/// 调用失败只影响本次信号投递，本地状态迁移仍以调度器为准。
#[async_trait]
pub trait AnalystClient: Send + Sync {
    /// 通知Analyst终止正在执行的任务
    async fn kill_task(&self, endpoint: &str, task_id: Uuid, reason: &str) -> SchedulerResult<()>;
}
