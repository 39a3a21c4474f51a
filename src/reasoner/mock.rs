//! 无需外部服务的 reasoner：脚本、闭包与确定性 Mock

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::reasoner::{Action, Reasoner, ReasonerError};
use crate::session::{SessionState, TaskStatus};

/// 按顺序回放预置结果；脚本耗尽后返回 Fatal
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<Result<Action, ReasonerError>>>,
}

impl ScriptedReasoner {
    pub fn new(actions: Vec<Action>) -> Self {
        Self::from_results(actions.into_iter().map(Ok).collect())
    }

    pub fn from_results(results: Vec<Result<Action, ReasonerError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn propose_action(&self, _state: &SessionState) -> Result<Action, ReasonerError> {
        let next = self
            .script
            .lock()
            .map_err(|_| ReasonerError::Fatal("script lock poisoned".into()))?
            .pop_front();
        next.unwrap_or_else(|| Err(ReasonerError::Fatal("script exhausted".into())))
    }
}

/// 由同步闭包决定动作，便于按状态编写测试策略
pub struct FnReasoner<F> {
    f: F,
}

impl<F> FnReasoner<F>
where
    F: Fn(&SessionState) -> Result<Action, ReasonerError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Reasoner for FnReasoner<F>
where
    F: Fn(&SessionState) -> Result<Action, ReasonerError> + Send + Sync,
{
    async fn propose_action(&self, state: &SessionState) -> Result<Action, ReasonerError> {
        (self.f)(state)
    }
}

/// 确定性 Mock：目标 → 一个任务 → echo 工具 → 完成 → Finish
///
/// 供 CLI 本地演示，不依赖任何 API
#[derive(Debug, Default)]
pub struct MockReasoner;

impl MockReasoner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Reasoner for MockReasoner {
    async fn propose_action(&self, state: &SessionState) -> Result<Action, ReasonerError> {
        let todo = &state.todo_list;
        if todo.is_empty() {
            return Ok(Action::AddTask {
                description: state.goal.clone(),
                depends_on: vec![],
            });
        }
        if let Some(task) = todo.iter().find(|t| t.status() == TaskStatus::InProgress) {
            let result = state
                .last_observation()
                .and_then(|v| v.get("output"))
                .and_then(|v| v.as_str())
                .unwrap_or("done")
                .to_string();
            return Ok(Action::CompleteTask {
                task_id: task.id().to_string(),
                result,
            });
        }
        if let Some(task) = todo.next_ready() {
            return Ok(Action::InvokeTool {
                tool: "echo".into(),
                args: serde_json::json!({ "text": format!("Echo from Mock: {}", task.description()) }),
                task_id: Some(task.id().to_string()),
            });
        }
        let summary = todo
            .iter()
            .filter_map(|t| t.result())
            .collect::<Vec<_>>()
            .join("; ");
        Ok(Action::Finish { summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_exhaustion_is_fatal() {
        let r = ScriptedReasoner::new(vec![Action::Finish { summary: "x".into() }]);
        let s = SessionState::new("s", "g");
        assert!(r.propose_action(&s).await.is_ok());
        assert!(matches!(r.propose_action(&s).await, Err(ReasonerError::Fatal(_))));
    }

    #[tokio::test]
    async fn test_mock_plans_then_invokes_echo() {
        let r = MockReasoner::new();
        let mut s = SessionState::new("s", "say hi");
        let a = r.propose_action(&s).await.unwrap();
        assert_eq!(a.kind(), "add_task");
        s.todo_list.add("say hi", vec![]).unwrap();
        match r.propose_action(&s).await.unwrap() {
            Action::InvokeTool { tool, task_id, .. } => {
                assert_eq!(tool, "echo");
                assert_eq!(task_id.as_deref(), Some("t1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
