//! 作业结束集合点
//!
//! 同步提交作业的调用方在这里登记，作业结束时生命周期管理器把结果投递过来。
//! 容量有限，登记项超过有效期后会被清理。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use taskfarm_core::{models::JobResult, SchedulerError, SchedulerResult};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

pub struct JobRendezvous {
    capacity: usize,
    ttl: Duration,
    slots: Mutex<HashMap<Uuid, (Instant, oneshot::Sender<JobResult>)>>,
}

impl JobRendezvous {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// 登记等待某个作业；同一作业重复登记时旧的等待者被替换
    pub async fn register(&self, job_id: Uuid) -> SchedulerResult<oneshot::Receiver<JobResult>> {
        let mut slots = self.slots.lock().await;

        if slots.len() >= self.capacity && !slots.contains_key(&job_id) {
            let ttl = self.ttl;
            slots.retain(|_, (registered, sender)| {
                registered.elapsed() < ttl && !sender.is_closed()
            });
            if slots.len() >= self.capacity {
                return Err(SchedulerError::InvalidState(format!(
                    "等待作业结束的请求过多(上限 {})",
                    self.capacity
                )));
            }
        }

        let (sender, receiver) = oneshot::channel();
        slots.insert(job_id, (Instant::now(), sender));
        Ok(receiver)
    }

    /// 投递作业结果；没有等待者时丢弃并返回 false
    pub async fn deliver(&self, result: JobResult) -> bool {
        let slot = self.slots.lock().await.remove(&result.job_id);
        match slot {
            Some((registered, sender)) if registered.elapsed() < self.ttl => {
                let job_id = result.job_id;
                if sender.send(result).is_err() {
                    debug!("作业 {} 的等待者已离开，丢弃结果", job_id);
                    return false;
                }
                true
            }
            Some(_) => {
                debug!("作业 {} 的等待登记已过期，丢弃结果", result.job_id);
                false
            }
            None => false,
        }
    }

    /// 登记并等待作业结束，超时返回 None
    pub async fn wait(&self, job_id: Uuid, timeout: Duration) -> SchedulerResult<Option<JobResult>> {
        let receiver = self.register(job_id).await?;
        self.wait_registered(job_id, receiver, timeout).await
    }

    /// 等待已经登记的接收端，超时后注销登记
    pub async fn wait_registered(
        &self,
        job_id: Uuid,
        receiver: oneshot::Receiver<JobResult>,
        timeout: Duration,
    ) -> SchedulerResult<Option<JobResult>> {
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => Ok(Some(result)),
            Ok(Err(_)) => {
                warn!("作业 {} 的等待被新的登记替换", job_id);
                Ok(None)
            }
            Err(_) => {
                self.unregister(job_id).await;
                Ok(None)
            }
        }
    }

    pub async fn unregister(&self, job_id: Uuid) {
        self.slots.lock().await.remove(&job_id);
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for JobRendezvous {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use taskfarm_core::models::{JobState, TaskStateCounts};

    fn result(job_id: Uuid) -> JobResult {
        JobResult {
            job_id,
            state: JobState::Success,
            counts: TaskStateCounts::default(),
        }
    }

    #[tokio::test]
    async fn test_deliver_wakes_waiter() {
        let rendezvous = Arc::new(JobRendezvous::default());
        let job_id = Uuid::now_v7();

        let waiter = {
            let rendezvous = rendezvous.clone();
            tokio::spawn(async move { rendezvous.wait(job_id, Duration::from_secs(5)).await })
        };
        while rendezvous.is_empty().await {
            tokio::task::yield_now().await;
        }

        assert!(rendezvous.deliver(result(job_id)).await);
        let received = waiter.await.unwrap().unwrap();
        assert_eq!(received.unwrap().job_id, job_id);
    }

    #[tokio::test]
    async fn test_result_delivered_before_waiting_is_kept() {
        let rendezvous = JobRendezvous::default();
        let job_id = Uuid::now_v7();

        let receiver = rendezvous.register(job_id).await.unwrap();
        assert!(rendezvous.deliver(result(job_id)).await);

        let received = rendezvous
            .wait_registered(job_id, receiver, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(received.map(|r| r.job_id), Some(job_id));
    }

    #[tokio::test]
    async fn test_deliver_without_waiter_is_dropped() {
        let rendezvous = JobRendezvous::default();
        assert!(!rendezvous.deliver(result(Uuid::now_v7())).await);
    }

    #[tokio::test]
    async fn test_wait_times_out_and_unregisters() {
        let rendezvous = JobRendezvous::default();
        let outcome = rendezvous
            .wait(Uuid::now_v7(), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert!(rendezvous.is_empty().await);
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let rendezvous = JobRendezvous::new(1, Duration::from_secs(30));
        let _first = rendezvous.register(Uuid::now_v7()).await.unwrap();
        assert!(rendezvous.register(Uuid::now_v7()).await.is_err());
    }
}
