//! 会话调度：有界并发 + FIFO 排队
//!
//! tokio 的 Semaphore 按请求顺序发放许可，编排器的分发器按提交顺序依次 acquire，
//! 因此排队会话严格先进先出。许可随会话任务一起移动，任务结束即归还。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::AgentError;

/// 会话调度器：限制同时运行的推理循环数
#[derive(Debug, Clone)]
pub struct SessionScheduler {
    semaphore: Arc<Semaphore>,
    max_parallel: usize,
    running: Arc<AtomicUsize>,
}

/// 运行许可：持有期间计入 running
#[derive(Debug)]
pub struct SessionPermit {
    _permit: OwnedSemaphorePermit,
    running: Arc<AtomicUsize>,
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SessionScheduler {
    pub fn new(max_parallel: usize) -> Self {
        let max_parallel = max_parallel.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_parallel)),
            max_parallel,
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 等待一个运行许可；调度器关闭后返回 Cancelled
    pub async fn acquire(&self) -> Result<SessionPermit, AgentError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AgentError::Cancelled)?;
        self.running.fetch_add(1, Ordering::SeqCst);
        Ok(SessionPermit {
            _permit: permit,
            running: self.running.clone(),
        })
    }

    /// 关闭后不再发放许可，排队中的 acquire 立即失败
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for SessionScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_permits_are_bounded() {
        let sched = SessionScheduler::new(2);
        let a = sched.acquire().await.unwrap();
        let _b = sched.acquire().await.unwrap();
        assert_eq!(sched.running(), 2);
        let third = tokio::time::timeout(Duration::from_millis(50), sched.acquire()).await;
        assert!(third.is_err(), "third permit must wait");
        drop(a);
        let _c = tokio::time::timeout(Duration::from_millis(50), sched.acquire())
            .await
            .expect("permit released")
            .unwrap();
        assert_eq!(sched.running(), 2);
    }

    #[tokio::test]
    async fn test_closed_scheduler_rejects() {
        let sched = SessionScheduler::new(1);
        sched.close();
        assert!(matches!(sched.acquire().await, Err(AgentError::Cancelled)));
    }

    #[test]
    fn test_zero_parallelism_clamped() {
        assert_eq!(SessionScheduler::new(0).max_parallel(), 1);
    }
}
