//! 工具执行器
//!
//! 持有会话的 ToolRegistry、全局超时与输出上限。execute(tool_name, args) 依次：
//! 查找工具 → schema 校验 → 在超时内执行（可被取消）→ 截断输出；
//! 每次调用输出结构化审计日志（JSON），并无论成败写入分析采集器。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::analytics::{AnalyticsCollector, OUTCOME_SUCCESS};
use crate::core::{AgentError, ErrorClass};
use crate::session::SessionId;
use crate::tools::schema::validate_args;
use crate::tools::ToolRegistry;

const TRUNCATED_MARKER: &str = "\n...[truncated]";

/// 单次工具调用结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { result: String },
    Failure { class: ErrorClass, message: String },
}

impl ToolOutcome {
    /// 分析计数用的结果类别键
    pub fn class_key(&self) -> &'static str {
        match self {
            ToolOutcome::Success { .. } => OUTCOME_SUCCESS,
            ToolOutcome::Failure { class, .. } => class.as_str(),
        }
    }
}

/// 一次工具调用的记录（瞬态，只有分析数据会留存）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: Value,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub outcome: ToolOutcome,
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// 工具执行器：超时、输出截断、审计、分析
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    max_output_bytes: usize,
    analytics: Option<Arc<AnalyticsCollector>>,
    session_id: Option<SessionId>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self {
            registry,
            timeout,
            max_output_bytes: 64 * 1024,
            analytics: None,
            session_id: None,
        }
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    pub fn with_analytics(mut self, analytics: Arc<AnalyticsCollector>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 执行指定工具；cancel 触发时丢弃进行中的工具 future 并返回 Cancelled
    pub async fn execute(
        &self,
        tool_name: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let started_at = Utc::now();
        let start = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            r = self.run(tool_name, args.clone()) => r,
        };
        let duration = start.elapsed();

        let outcome = match &result {
            Ok(content) => ToolOutcome::Success {
                result: content.clone(),
            },
            Err(e) => ToolOutcome::Failure {
                class: e.class(),
                message: e.to_string(),
            },
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "session_id": self.session_id,
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome.class_key(),
            "duration_ms": duration.as_millis() as u64,
            "args_preview": args_preview(&args),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        if let Some(analytics) = &self.analytics {
            let invocation = ToolInvocation {
                tool_name: tool_name.to_string(),
                arguments: args,
                started_at,
                duration,
                outcome,
            };
            analytics.record_tool(self.session_id.as_deref(), &invocation);
        }
        result
    }

    async fn run(&self, tool_name: &str, args: Value) -> Result<String, AgentError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| AgentError::UnknownTool(tool_name.to_string()))?;
        validate_args(tool_name, &tool.parameters_schema(), &args)?;

        let limit = tool.timeout().unwrap_or(self.timeout);
        let output = tokio::time::timeout(limit, tool.execute(args))
            .await
            .map_err(|_| {
                AgentError::Timeout(format!(
                    "tool '{}' exceeded {}ms",
                    tool_name,
                    limit.as_millis()
                ))
            })??;
        Ok(truncate_output(output, self.max_output_bytes))
    }
}

/// 按字节上限截断（落在字符边界上），并追加截断标记
pub fn truncate_output(mut s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
    s.push_str(TRUNCATED_MARKER);
    s
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
