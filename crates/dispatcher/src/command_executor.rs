//! 本地命令执行器
//!
//! 管理操作以命令形式提交：同步校验参数并持久化，然后交给单个后台任务顺序执行。

use std::sync::Arc;

use taskfarm_core::{
    models::{Command, CommandSpec, CommandState, CommandType, JobUpdateSpec},
    traits::CommandRepository,
    SchedulerError, SchedulerResult,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::lifecycle::LifecycleManager;

const QUEUE_CAPACITY: usize = 1000;

pub struct CommandExecutor {
    command_repo: Arc<dyn CommandRepository>,
    sender: mpsc::Sender<Command>,
}

impl CommandExecutor {
    /// 创建执行器并启动后台消费任务；执行器被丢弃后消费任务在处理完队列后退出
    pub fn start(
        command_repo: Arc<dyn CommandRepository>,
        lifecycle: Arc<LifecycleManager>,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let worker = CommandWorker {
            command_repo: command_repo.clone(),
            lifecycle,
        };
        let handle = tokio::spawn(worker.run(receiver));
        (
            Self {
                command_repo,
                sender,
            },
            handle,
        )
    }

    /// 校验并提交命令；参数不合法时不会持久化
    pub async fn submit(&self, spec: &CommandSpec) -> SchedulerResult<Command> {
        spec.validate()?;

        let command = self.command_repo.create(spec).await?;
        if let Err(e) = self.sender.try_send(command.clone()) {
            let message = format!("命令队列不可用: {e}");
            self.command_repo
                .set_state(command.id, CommandState::Cancelled, Some(&message))
                .await?;
            return Err(SchedulerError::Internal(message));
        }

        debug!("提交命令 {} ({})", command.id, command.command_type.as_str());
        Ok(command)
    }

    pub async fn get(&self, id: Uuid) -> SchedulerResult<Command> {
        self.command_repo.get(id).await
    }
}

struct CommandWorker {
    command_repo: Arc<dyn CommandRepository>,
    lifecycle: Arc<LifecycleManager>,
}

impl CommandWorker {
    async fn run(self, mut receiver: mpsc::Receiver<Command>) {
        info!("命令执行器已启动");
        while let Some(command) = receiver.recv().await {
            self.process(&command).await;
        }
        info!("命令执行器已停止");
    }

    async fn process(&self, command: &Command) {
        if let Err(e) = self
            .command_repo
            .set_state(command.id, CommandState::Running, None)
            .await
        {
            error!("更新命令 {} 状态时出错: {}", command.id, e);
        }

        let (state, message) = match self.execute(command).await {
            Ok(message) => {
                info!("命令 {} 执行完成: {}", command.id, message);
                (CommandState::Finished, message)
            }
            Err(e) => {
                warn!("命令 {} 执行失败: {}", command.id, e);
                (CommandState::Failure, e.to_string())
            }
        };

        if let Err(e) = self
            .command_repo
            .set_state(command.id, state, Some(&message))
            .await
        {
            error!("记录命令 {} 结果时出错: {}", command.id, e);
        }
    }

    async fn execute(&self, command: &Command) -> SchedulerResult<String> {
        let job_id = command.uuid_arg(0)?;
        match command.command_type {
            CommandType::RetryAllFailures => {
                let retried = self.lifecycle.retry_all_failures(job_id).await?;
                Ok(format!("重试了 {retried} 个失败任务"))
            }
            CommandType::CancelJob => {
                let message = if self.lifecycle.cancel_job(job_id).await? {
                    "作业已取消"
                } else {
                    "作业不在进行中"
                };
                Ok(message.to_string())
            }
            CommandType::RestartJob => {
                let message = if self.lifecycle.restart_job(job_id).await? {
                    "作业已重新启动"
                } else {
                    "作业未被取消"
                };
                Ok(message.to_string())
            }
            CommandType::SetJobPriority => {
                let priority = command.int_arg(1)?;
                let update = JobUpdateSpec {
                    priority: Some(priority),
                    ..Default::default()
                };
                self.lifecycle.update_job(job_id, &update).await?;
                Ok(format!("优先级设置为 {priority}"))
            }
            CommandType::SetMaxRunningTasks => {
                let max = command.int_arg(1)?;
                let update = JobUpdateSpec {
                    max_running_tasks: Some(max),
                    ..Default::default()
                };
                self.lifecycle.update_job(job_id, &update).await?;
                Ok(format!("最大并发运行任务数设置为 {max}"))
            }
            CommandType::DeleteJob => {
                let deleted = self.lifecycle.delete_job(job_id).await?;
                if !deleted {
                    return Err(SchedulerError::JobNotFound { id: job_id });
                }
                Ok("作业已删除".to_string())
            }
        }
    }
}
