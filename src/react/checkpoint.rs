//! 检查点写入
//!
//! 整快照替换写入存储；StoreUnavailable 按 RecoveryEngine 的退避策略有限次重试，
//! 等待期间可被取消。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::session::SessionState;
use crate::store::TaskStore;

#[derive(Clone)]
pub struct Checkpointer {
    store: Arc<dyn TaskStore>,
    recovery: RecoveryEngine,
}

impl Checkpointer {
    pub fn new(store: Arc<dyn TaskStore>, recovery: RecoveryEngine) -> Self {
        Self { store, recovery }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// 写入快照；`on_retry` 在每次退避前回调（attempt 从 1 计）
    pub async fn commit(
        &self,
        state: &SessionState,
        cancel: Option<&CancellationToken>,
        mut on_retry: impl FnMut(u32, &AgentError),
    ) -> Result<(), AgentError> {
        let mut attempt = 0u32;
        loop {
            let err = match self.store.save(state).await {
                Ok(()) => return Ok(()),
                Err(e) => AgentError::from(e),
            };
            match self.recovery.handle(&err, attempt) {
                RecoveryAction::RetryAfter(delay) => {
                    attempt += 1;
                    tracing::warn!(
                        session_id = %state.session_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "checkpoint failed, retrying: {}",
                        err
                    );
                    on_retry(attempt, &err);
                    match cancel {
                        Some(token) => {
                            tokio::select! {
                                biased;
                                _ = token.cancelled() => return Err(AgentError::Cancelled),
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                }
                _ => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BackoffPolicy;
    use crate::store::{MemoryTaskStore, SessionPage, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 前 n 次 save 失败
    struct FlakyStore {
        failures_left: AtomicU32,
        inner: MemoryTaskStore,
    }

    #[async_trait]
    impl TaskStore for FlakyStore {
        async fn load(&self, id: &str) -> Result<SessionState, StoreError> {
            self.inner.load(id).await
        }

        async fn save(&self, state: &SessionState) -> Result<(), StoreError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Unavailable("disk busy".into()));
            }
            self.inner.save(state).await
        }

        async fn list_sessions(&self, c: Option<&str>, n: usize) -> Result<SessionPage, StoreError> {
            self.inner.list_sessions(c, n).await
        }

        async fn delete(&self, id: &str) -> Result<(), StoreError> {
            self.inner.delete(id).await
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    fn checkpointer(failures: u32) -> Checkpointer {
        let store = Arc::new(FlakyStore {
            failures_left: AtomicU32::new(failures),
            inner: MemoryTaskStore::new(),
        });
        Checkpointer::new(store, RecoveryEngine::new(BackoffPolicy::immediate(3)))
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let cp = checkpointer(2);
        let mut retries = 0;
        let s = SessionState::new("s1", "g");
        cp.commit(&s, None, |_, _| retries += 1).await.unwrap();
        assert_eq!(retries, 2);
        assert_eq!(cp.store().load("s1").await.unwrap(), s);
    }

    #[tokio::test]
    async fn test_gives_up_with_store_unavailable() {
        let cp = checkpointer(3);
        let err = cp
            .commit(&SessionState::new("s1", "g"), None, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::StoreUnavailable(_)));
    }
}
