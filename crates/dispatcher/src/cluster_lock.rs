use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use taskfarm_core::{
    models::{now_millis, ClusterLockSpec, LockStatus},
    traits::ClusterLockRepository,
    SchedulerResult,
};
use tracing::{debug, error, warn};

const BACKOFF_STEP: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(10);

/// 在集群锁保护下执行代码块
pub struct ClusterLockExecutor {
    lock_repo: Arc<dyn ClusterLockRepository>,
    host: String,
}

impl ClusterLockExecutor {
    pub fn new(lock_repo: Arc<dyn ClusterLockRepository>, host: impl Into<String>) -> Self {
        Self {
            lock_repo,
            host: host.into(),
        }
    }

    fn backoff(attempt: u32) -> Duration {
        BACKOFF_STEP.saturating_mul(attempt).min(BACKOFF_MAX)
    }

    /// 获取锁后执行 `body`
    ///
    /// 执行期间有其他节点请求合并时再执行一次。没拿到锁(或已请求持有者合并执行)返回 None。
    pub async fn inline<F, Fut, T>(&self, spec: &ClusterLockSpec, mut body: F) -> SchedulerResult<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.acquire(spec).await? {
            return Ok(None);
        }

        let mut output = body().await;
        loop {
            match self.lock_repo.combine(&spec.name).await {
                Ok(true) => {
                    debug!("执行集群锁 {} 的合并请求", spec.name);
                    output = body().await;
                }
                Ok(false) => break,
                Err(e) => {
                    error!("读取集群锁 {} 的合并请求时出错: {}", spec.name, e);
                    break;
                }
            }
        }

        if !spec.hold_till_timeout {
            if let Err(e) = self.lock_repo.unlock(&spec.name).await {
                error!("释放集群锁 {} 时出错: {}", spec.name, e);
            }
        }

        Ok(Some(output))
    }

    async fn acquire(&self, spec: &ClusterLockSpec) -> SchedulerResult<bool> {
        let max_tries = spec.max_tries.max(1);
        for attempt in 1..=max_tries {
            match self.lock_repo.lock(spec, &self.host).await? {
                LockStatus::Locked => return Ok(true),
                LockStatus::Combined => {
                    debug!("集群锁 {} 已被持有，已请求持有者合并执行", spec.name);
                    return Ok(false);
                }
                LockStatus::Wait => {
                    if attempt < max_tries {
                        tokio::time::sleep(Self::backoff(attempt)).await;
                    }
                }
            }
        }

        if max_tries > 1 {
            warn!("尝试 {} 次后仍未获得集群锁 {}", max_tries, spec.name);
        }
        Ok(false)
    }

    pub async fn unlock(&self, name: &str) -> SchedulerResult<bool> {
        self.lock_repo.unlock(name).await
    }

    pub async fn is_locked(&self, name: &str) -> SchedulerResult<bool> {
        self.lock_repo.is_locked(name).await
    }

    /// 清除已过期的锁；出错时记录日志并返回 0
    pub async fn clear_expired(&self) -> u64 {
        match self.lock_repo.clear_expired(now_millis()).await {
            Ok(cleared) => cleared,
            Err(e) => {
                error!("清除过期集群锁时出错: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_linear_and_capped() {
        assert_eq!(ClusterLockExecutor::backoff(1), Duration::from_millis(100));
        assert_eq!(ClusterLockExecutor::backoff(5), Duration::from_millis(500));
        assert_eq!(ClusterLockExecutor::backoff(1000), Duration::from_secs(10));
    }
}
