//! 会话状态快照
//!
//! SessionState 由唯一的推理循环持有，每次检查点整体替换写入存储；
//! 存储层只读写完整快照，不做局部字段更新。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ErrorClass;
use crate::session::TodoList;

/// 会话 ID
pub type SessionId = String;

/// 会话终态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    Done { summary: String },
    Failed { reason: ErrorClass, message: String },
}

impl SessionOutcome {
    pub fn failed(reason: ErrorClass, message: impl Into<String>) -> Self {
        SessionOutcome::Failed {
            reason,
            message: message.into(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, SessionOutcome::Done { .. })
    }

    /// 分析计数用的键："done" 或失败类别
    pub fn class_key(&self) -> &'static str {
        match self {
            SessionOutcome::Done { .. } => "done",
            SessionOutcome::Failed { reason, .. } => reason.as_str(),
        }
    }
}

/// 单个会话的完整状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub goal: String,
    pub todo_list: TodoList,
    /// 任意键值上下文；循环在 `last_observation` 下写入上一步结果供 reasoner 读取
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    pub iteration_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub outcome: Option<SessionOutcome>,
}

/// 上一步结果在 context 中的键
pub const LAST_OBSERVATION_KEY: &str = "last_observation";

impl SessionState {
    pub fn new(session_id: impl Into<SessionId>, goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            goal: goal.into(),
            todo_list: TodoList::new(),
            context: BTreeMap::new(),
            iteration_count: 0,
            created_at: now,
            last_updated: now,
            outcome: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn last_observation(&self) -> Option<&Value> {
        self.context.get(LAST_OBSERVATION_KEY)
    }

    pub fn set_observation(&mut self, observation: Value) {
        self.context
            .insert(LAST_OBSERVATION_KEY.to_string(), observation);
    }

    /// 失败会话的最后错误：优先取终态原因，其次取最近失败任务
    pub fn last_error(&self) -> Option<String> {
        match &self.outcome {
            Some(SessionOutcome::Failed { reason, message }) => {
                Some(format!("{reason}: {message}"))
            }
            _ => self.todo_list.last_error().map(String::from),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            goal: self.goal.clone(),
            todo_count: self.todo_list.len(),
            iteration_count: self.iteration_count,
            last_updated: self.last_updated,
            outcome: self.outcome.clone(),
        }
    }
}

/// list_sessions 返回的会话摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub goal: String,
    pub todo_count: usize,
    pub iteration_count: u64,
    pub last_updated: DateTime<Utc>,
    pub outcome: Option<SessionOutcome>,
}

/// 会话 ID 仅允许 [A-Za-z0-9_-]，作为文件名 / 目录名时不会逃逸
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip_is_exact() {
        let mut s = SessionState::new("s-1", "research rust async");
        let a = s.todo_list.add("search", vec![]).unwrap();
        s.todo_list.add("summarize", vec![a.clone()]).unwrap();
        s.todo_list.start(&a).unwrap();
        s.todo_list.complete(&a, "found 3 sources").unwrap();
        s.context.insert("score".into(), serde_json::json!(0.1 + 0.2));
        s.context.insert("nested".into(), serde_json::json!({"k": [1, "two", null]}));
        s.iteration_count = 3;
        s.outcome = Some(SessionOutcome::failed(ErrorClass::Timeout, "slow"));

        let json = serde_json::to_string(&s).unwrap();
        let back: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_last_error_prefers_outcome() {
        let mut s = SessionState::new("s", "g");
        let t = s.todo_list.add("x", vec![]).unwrap();
        s.todo_list.start(&t).unwrap();
        s.todo_list.fail(&t, "tool broke").unwrap();
        assert_eq!(s.last_error().as_deref(), Some("tool broke"));
        s.outcome = Some(SessionOutcome::failed(ErrorClass::Cancelled, "by user"));
        assert_eq!(s.last_error().as_deref(), Some("cancelled: by user"));
    }

    #[test]
    fn test_session_id_validation() {
        assert!(is_valid_session_id("3f2a-b_9"));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("../etc"));
        assert!(!is_valid_session_id("a/b"));
    }
}
