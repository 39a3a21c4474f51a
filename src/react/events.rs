//! 推理循环过程事件：阶段变化、动作、工具调用与观察，可序列化为 JSON 推给前端

use serde::Serialize;

use crate::session::{SessionId, SessionOutcome};

/// 推理循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Idle,
    Thinking,
    Acting,
    Checkpointing,
    Done,
    Failed,
}

impl LoopPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopPhase::Done | LoopPhase::Failed)
    }
}

/// 单步过程事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// 阶段切换
    Phase {
        session_id: SessionId,
        phase: LoopPhase,
        iteration: u64,
    },
    /// reasoner 给出的动作类型
    Action { session_id: SessionId, kind: String },
    ToolCall {
        session_id: SessionId,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        session_id: SessionId,
        tool: String,
        preview: String,
    },
    ToolFailure {
        session_id: SessionId,
        tool: String,
        reason: String,
    },
    /// 检查点写入重试
    Recovery {
        session_id: SessionId,
        attempt: u32,
        detail: String,
    },
    Finished {
        session_id: SessionId,
        outcome: SessionOutcome,
    },
}
