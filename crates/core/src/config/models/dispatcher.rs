use serde::{Deserialize, Serialize};

/// 分派与生命周期配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 公平调度阶段每个项目一次拉取的候选任务数
    pub poll_count: i64,
    /// DispatchPriority 缓存有效期
    pub priority_cache_seconds: u64,
    /// 自动重试的运行次数上限
    pub auto_retry_limit: i64,
    /// 新建作业默认的最大并发运行任务数
    pub default_max_running_tasks: i64,
    /// 单次拉取最多领取的任务数
    pub max_tasks_per_request: i64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_count: 5,
            priority_cache_seconds: 10,
            auto_retry_limit: 3,
            default_max_running_tasks: 1024,
            max_tasks_per_request: 10,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_count <= 0 {
            return Err(anyhow::anyhow!("每次拉取的候选任务数必须大于0"));
        }

        if self.auto_retry_limit < 0 {
            return Err(anyhow::anyhow!("自动重试上限不能为负数"));
        }

        if self.default_max_running_tasks <= 0 {
            return Err(anyhow::anyhow!("默认最大并发运行任务数必须大于0"));
        }

        if self.max_tasks_per_request <= 0 {
            return Err(anyhow::anyhow!("单次拉取任务数必须大于0"));
        }

        Ok(())
    }
}

/// 维护循环配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    /// 两次维护之间的固定间隔
    pub interval_millis: u64,
    /// 首次运行前的最大随机延迟
    pub initial_delay_max_millis: u64,
    pub resume_paused_interval_seconds: u64,
    /// 心跳超过该时长的 Running/Queued 任务视为孤儿
    pub orphan_task_timeout_seconds: i64,
    pub orphan_batch_size: i64,
    pub analyst_down_timeout_seconds: i64,
    pub analyst_remove_timeout_seconds: i64,
    /// 已结束作业的保留天数
    pub archive_jobs_after_days: i64,
    pub expired_job_batch_size: i64,
    pub lock_timeout_seconds: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_millis: 1000,
            initial_delay_max_millis: 5000,
            resume_paused_interval_seconds: 5,
            orphan_task_timeout_seconds: 15 * 60,
            orphan_batch_size: 15,
            analyst_down_timeout_seconds: 5 * 60,
            analyst_remove_timeout_seconds: 60 * 60,
            archive_jobs_after_days: 90,
            expired_job_batch_size: 50,
            lock_timeout_seconds: 60,
        }
    }
}

impl MaintenanceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_millis == 0 {
            return Err(anyhow::anyhow!("维护间隔必须大于0"));
        }

        if self.resume_paused_interval_seconds == 0 {
            return Err(anyhow::anyhow!("暂停恢复间隔必须大于0"));
        }

        if self.orphan_task_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("孤儿任务超时时间必须大于0"));
        }

        if self.analyst_down_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("Analyst失联判定时间必须大于0"));
        }

        if self.analyst_remove_timeout_seconds < self.analyst_down_timeout_seconds {
            return Err(anyhow::anyhow!("Analyst删除时间不能小于失联判定时间"));
        }

        if self.archive_jobs_after_days <= 0 {
            return Err(anyhow::anyhow!("作业保留天数必须大于0"));
        }

        Ok(())
    }
}

/// 调度器访问Analyst的HTTP客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalystClientConfig {
    pub connect_timeout_millis: u64,
    pub request_timeout_seconds: u64,
}

impl Default for AnalystClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_millis: 1000,
            request_timeout_seconds: 120,
        }
    }
}

impl AnalystClientConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.connect_timeout_millis == 0 || self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Analyst客户端超时时间必须大于0"));
        }
        Ok(())
    }
}
