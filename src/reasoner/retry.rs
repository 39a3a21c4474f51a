//! 带指数退避的 reasoner 包装
//!
//! 只有 RateLimited / Transient 会重试；Malformed 与 Fatal 立即返回。
//! 限流响应带 retry_after 时取它与退避时长中较大者，仍受 max_delay_ms 封顶。

use std::time::Duration;

use async_trait::async_trait;

use crate::core::BackoffPolicy;
use crate::reasoner::{Action, Reasoner, ReasonerError};
use crate::session::SessionState;

pub struct RetryingReasoner<R> {
    inner: R,
    policy: BackoffPolicy,
}

impl<R: Reasoner> RetryingReasoner<R> {
    pub fn new(inner: R, policy: BackoffPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    fn wait_for(&self, err: &ReasonerError, attempt: u32) -> Duration {
        let backoff = self.policy.delay(attempt);
        match err {
            ReasonerError::RateLimited {
                retry_after_ms: Some(ms),
            } => backoff
                .max(Duration::from_millis(*ms))
                .min(Duration::from_millis(self.policy.max_delay_ms)),
            _ => backoff,
        }
    }
}

#[async_trait]
impl<R: Reasoner> Reasoner for RetryingReasoner<R> {
    async fn propose_action(&self, state: &SessionState) -> Result<Action, ReasonerError> {
        let mut attempt = 0u32;
        loop {
            match self.inner.propose_action(state).await {
                Ok(action) => return Ok(action),
                Err(e) if e.is_retryable() && self.policy.should_retry(attempt) => {
                    let wait = self.wait_for(&e, attempt);
                    tracing::warn!(
                        session_id = %state.session_id,
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        "reasoner call failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoner::ScriptedReasoner;

    fn finish() -> Action {
        Action::Finish { summary: "ok".into() }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retried_until_success() {
        let inner = ScriptedReasoner::from_results(vec![
            Err(ReasonerError::Transient("503".into())),
            Err(ReasonerError::RateLimited { retry_after_ms: Some(1500) }),
            Ok(finish()),
        ]);
        let r = RetryingReasoner::new(inner, BackoffPolicy::reasoner_default());
        let start = tokio::time::Instant::now();
        let action = r.propose_action(&SessionState::new("s", "g")).await.unwrap();
        assert_eq!(action, finish());
        // 500ms 退避 + max(1000ms, 1500ms)
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let inner = ScriptedReasoner::from_results(
            (0..10).map(|_| Err(ReasonerError::Transient("down".into()))).collect(),
        );
        let r = RetryingReasoner::new(inner, BackoffPolicy::reasoner_default());
        let err = r.propose_action(&SessionState::new("s", "g")).await.unwrap_err();
        assert!(matches!(err, ReasonerError::Transient(_)));
        assert_eq!(r.inner.remaining(), 6);
    }

    #[tokio::test]
    async fn test_malformed_not_retried() {
        let inner = ScriptedReasoner::from_results(vec![
            Err(ReasonerError::Malformed("?".into())),
            Ok(finish()),
        ]);
        let r = RetryingReasoner::new(inner, BackoffPolicy::immediate(4));
        assert!(matches!(
            r.propose_action(&SessionState::new("s", "g")).await,
            Err(ReasonerError::Malformed(_))
        ));
    }
}
