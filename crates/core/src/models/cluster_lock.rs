use serde::{Deserialize, Serialize};

/// 命名租约锁
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterLock {
    pub name: String,
    pub host: String,
    pub combine_count: i64,
    pub time_locked: i64,
    pub time_expired: i64,
}

/// 加锁结果
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LockStatus {
    /// 获得锁
    Locked,
    /// 锁被他人持有且未过期
    Wait,
    /// 锁被他人持有，已请求持有者合并执行一次
    Combined,
}

/// 加锁参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterLockSpec {
    pub name: String,
    pub timeout_seconds: i64,
    pub max_tries: u32,
    /// 锁已被持有时，请求持有者再执行一次而不是等待
    pub combine_multiple: bool,
    /// 执行完成后不释放，直到租约过期
    pub hold_till_timeout: bool,
}

impl ClusterLockSpec {
    /// 只尝试一次的非阻塞锁
    pub fn soft_lock(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout_seconds: 60,
            max_tries: 1,
            combine_multiple: false,
            hold_till_timeout: false,
        }
    }

    /// 持续重试直到拿到锁
    pub fn hard_lock(name: impl Into<String>) -> Self {
        Self {
            max_tries: 100,
            ..Self::soft_lock(name)
        }
    }

    pub fn with_timeout(mut self, seconds: i64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_combine(mut self) -> Self {
        self.combine_multiple = true;
        self
    }

    pub fn with_hold_till_timeout(mut self) -> Self {
        self.hold_till_timeout = true;
        self
    }
}
