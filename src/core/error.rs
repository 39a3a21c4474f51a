//! Agent 错误类型与错误类别
//!
//! AgentError 覆盖推理循环可能遇到的全部错误；ErrorClass 是其可序列化的「类别」投影，
//! 作为会话 Failed 的原因写入快照，也作为分析计数的键。与 RecoveryEngine 配合决定上报 / 重试 / 终止。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::TaskError;
use crate::store::StoreError;

/// 推理循环、工具调用、存储交互中出现的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// 参数不符合工具声明的 schema，执行前拒绝
    #[error("Schema violation for tool '{tool}': {reason}")]
    SchemaViolation { tool: String, reason: String },

    /// 工具或 reasoner 超出时间预算
    #[error("Timeout: {0}")]
    Timeout(String),

    /// 沙箱逃逸（如 ../../etc/passwd）
    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    /// 迭代 / 墙钟上限
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    /// 检查点写入失败（重试耗尽后终止会话）
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    /// reasoner 提出的动作无法应用（非法状态迁移、未知任务、依赖成环等）
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Reasoner error: {0}")]
    Reasoner(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    /// 会话执行单元异常退出（panic 等），不向调用方暴露原始信息
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AgentError::SchemaViolation { .. } => ErrorClass::SchemaViolation,
            AgentError::Timeout(_) => ErrorClass::Timeout,
            AgentError::PathEscape(_) => ErrorClass::PathEscape,
            AgentError::BudgetExceeded(_) => ErrorClass::BudgetExceeded,
            AgentError::StoreUnavailable(_) => ErrorClass::StoreUnavailable,
            AgentError::Cancelled => ErrorClass::Cancelled,
            AgentError::UnknownTool(_) => ErrorClass::UnknownTool,
            AgentError::ToolExecutionFailed(_) => ErrorClass::ToolFailed,
            AgentError::InvalidAction(_) => ErrorClass::InvalidAction,
            AgentError::Reasoner(_) => ErrorClass::Reasoner,
            AgentError::ConfigError(_) => ErrorClass::Config,
            AgentError::Internal(_) => ErrorClass::Internal,
        }
    }

    /// 只影响当前 Acting 步骤、应交还给 reasoner 的错误
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            AgentError::SchemaViolation { .. }
                | AgentError::Timeout(_)
                | AgentError::PathEscape(_)
                | AgentError::UnknownTool(_)
                | AgentError::ToolExecutionFailed(_)
                | AgentError::InvalidAction(_)
        )
    }
}

impl From<TaskError> for AgentError {
    fn from(e: TaskError) -> Self {
        AgentError::InvalidAction(e.to_string())
    }
}

impl From<StoreError> for AgentError {
    fn from(e: StoreError) -> Self {
        AgentError::StoreUnavailable(e.to_string())
    }
}

/// 错误类别：会话失败原因与分析计数键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    SchemaViolation,
    Timeout,
    PathEscape,
    BudgetExceeded,
    StoreUnavailable,
    Cancelled,
    UnknownTool,
    ToolFailed,
    InvalidAction,
    Reasoner,
    Config,
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::SchemaViolation => "schema violation",
            ErrorClass::Timeout => "timeout",
            ErrorClass::PathEscape => "path escape",
            ErrorClass::BudgetExceeded => "budget exceeded",
            ErrorClass::StoreUnavailable => "store unavailable",
            ErrorClass::Cancelled => "cancelled",
            ErrorClass::UnknownTool => "unknown tool",
            ErrorClass::ToolFailed => "tool failed",
            ErrorClass::InvalidAction => "invalid action",
            ErrorClass::Reasoner => "reasoner error",
            ErrorClass::Config => "config error",
            ErrorClass::Internal => "internal error",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_text() {
        assert_eq!(AgentError::Cancelled.class().to_string(), "cancelled");
        assert_eq!(
            AgentError::BudgetExceeded("20 iterations".into()).class().to_string(),
            "budget exceeded"
        );
    }

    #[test]
    fn test_local_errors_do_not_include_terminal_ones() {
        assert!(AgentError::PathEscape("../x".into()).is_local());
        assert!(AgentError::UnknownTool("nope".into()).is_local());
        assert!(!AgentError::Cancelled.is_local());
        assert!(!AgentError::StoreUnavailable("io".into()).is_local());
        assert!(!AgentError::BudgetExceeded("x".into()).is_local());
    }

    #[test]
    fn test_task_error_maps_to_invalid_action() {
        let err: AgentError = TaskError::UnknownTask("t9".into()).into();
        assert_eq!(err.class(), ErrorClass::InvalidAction);
    }
}
