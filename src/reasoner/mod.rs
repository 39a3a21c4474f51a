//! Reasoner：把会话状态映射为下一步动作的外部能力
//!
//! 单方法 trait，具体后端（LLM / 脚本 / Mock）在构造时选定；
//! RetryingReasoner 对可重试错误做指数退避。

pub mod action;
pub mod llm;
pub mod mock;
pub mod openai;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ReasonerSection;
use crate::core::AgentError;
use crate::session::SessionState;

pub use action::{action_schema_json, parse_action, Action};
pub use llm::{LlmClient, LlmReasoner, Message, Role};
pub use mock::{FnReasoner, MockReasoner, ScriptedReasoner};
pub use openai::OpenAiClient;
pub use retry::RetryingReasoner;

/// Reasoner 调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReasonerError {
    #[error("rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("transient reasoner failure: {0}")]
    Transient(String),

    /// 输出无法解析为动作；循环把它作为观察交还给 reasoner
    #[error("malformed action: {0}")]
    Malformed(String),

    #[error("reasoner failure: {0}")]
    Fatal(String),
}

impl ReasonerError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReasonerError::RateLimited { .. } | ReasonerError::Transient(_)
        )
    }
}

impl From<ReasonerError> for AgentError {
    fn from(e: ReasonerError) -> Self {
        AgentError::Reasoner(e.to_string())
    }
}

/// 下一步动作的提出者
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn propose_action(&self, state: &SessionState) -> Result<Action, ReasonerError>;
}

#[async_trait]
impl<R: Reasoner + ?Sized> Reasoner for Arc<R> {
    async fn propose_action(&self, state: &SessionState) -> Result<Action, ReasonerError> {
        (**self).propose_action(state).await
    }
}

/// 按配置创建 reasoner（外层包一层重试）
///
/// `tools_json` 为可用工具的 schema 列表，仅 LLM 后端使用
pub fn create_reasoner(cfg: &ReasonerSection, tools_json: String) -> Result<Arc<dyn Reasoner>, AgentError> {
    match cfg.provider.trim().to_lowercase().as_str() {
        "mock" => {
            tracing::info!("Using mock reasoner");
            Ok(Arc::new(MockReasoner::new()))
        }
        "openai" => {
            let client = OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, None);
            tracing::info!(model = %cfg.model, "Using OpenAI-compatible reasoner");
            let mut reasoner = LlmReasoner::new(Arc::new(client)).with_tools(tools_json);
            if let Some(prompt) = &cfg.system_prompt {
                reasoner = reasoner.with_system_prompt(prompt.clone());
            }
            Ok(Arc::new(RetryingReasoner::new(reasoner, cfg.retry.clone())))
        }
        other => Err(AgentError::ConfigError(format!(
            "unknown reasoner provider '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_reasoner_rejects_unknown_provider() {
        let cfg = ReasonerSection {
            provider: "oracle".into(),
            ..ReasonerSection::default()
        };
        assert!(matches!(
            create_reasoner(&cfg, "[]".into()),
            Err(AgentError::ConfigError(_))
        ));
        assert!(create_reasoner(&ReasonerSection::default(), "[]".into()).is_ok());
    }

    #[test]
    fn test_retryable_classes() {
        assert!(ReasonerError::Transient("x".into()).is_retryable());
        assert!(ReasonerError::RateLimited { retry_after_ms: None }.is_retryable());
        assert!(!ReasonerError::Malformed("x".into()).is_retryable());
        assert!(!ReasonerError::Fatal("x".into()).is_retryable());
    }
}
