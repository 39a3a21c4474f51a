//! 基于 LLM 的 reasoner
//!
//! 把会话状态渲染为对话消息（system：角色 + 动作 schema + 可用工具；user：目标、任务表、上一步观察），
//! 调用 LlmClient 并从输出中解析 Action。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::reasoner::{action_schema_json, parse_action, Action, Reasoner, ReasonerError};
use crate::session::{SessionState, TaskStatus};

const DEFAULT_SYSTEM_PROMPT: &str = "You are an autonomous agent working through a todo list. \
Each turn, reply with exactly one JSON action matching the schema below. \
Add tasks for the work you plan, invoke tools to do it, complete tasks with their results, \
and finish with a summary once the goal is met.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, ReasonerError>;
}

pub struct LlmReasoner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    tools_json: String,
}

impl LlmReasoner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            tools_json: "[]".to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tools(mut self, tools_json: impl Into<String>) -> Self {
        self.tools_json = tools_json.into();
        self
    }

    pub fn build_messages(&self, state: &SessionState) -> Vec<Message> {
        let system = format!(
            "{}\n\n## Action schema\n{}\n\n## Available tools\n{}",
            self.system_prompt,
            action_schema_json(),
            self.tools_json
        );
        vec![Message::system(system), Message::user(render_state(state))]
    }
}

fn status_mark(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "[ ]",
        TaskStatus::InProgress => "[~]",
        TaskStatus::Complete => "[x]",
        TaskStatus::Failed => "[!]",
    }
}

/// 会话状态的文本视图
pub fn render_state(state: &SessionState) -> String {
    let mut out = format!(
        "Goal: {}\nIteration: {}\n\nTodo list:\n",
        state.goal, state.iteration_count
    );
    if state.todo_list.is_empty() {
        out.push_str("(empty)\n");
    }
    for task in state.todo_list.iter() {
        out.push_str(&format!("{} {} {}", status_mark(task.status()), task.id(), task.description()));
        if !task.depends_on().is_empty() {
            out.push_str(&format!(" (after {})", task.depends_on().join(", ")));
        }
        if let Some(r) = task.result() {
            out.push_str(&format!(" => {r}"));
        }
        if let Some(e) = task.error() {
            out.push_str(&format!(" !! {e}"));
        }
        out.push('\n');
    }
    if let Some(obs) = state.last_observation() {
        out.push_str(&format!("\nLast observation:\n{obs}\n"));
    }
    out
}

#[async_trait]
impl Reasoner for LlmReasoner {
    async fn propose_action(&self, state: &SessionState) -> Result<Action, ReasonerError> {
        let messages = self.build_messages(state);
        let output = self.llm.complete(&messages).await?;
        tracing::debug!(session_id = %state.session_id, output_len = output.len(), "reasoner output");
        parse_action(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CannedLlm {
        reply: String,
        seen: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(&self, messages: &[Message]) -> Result<String, ReasonerError> {
            self.seen.lock().unwrap().extend_from_slice(messages);
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn test_prompt_includes_state_and_parses_reply() {
        let llm = Arc::new(CannedLlm {
            reply: "```json\n{\"action\":\"complete_task\",\"task_id\":\"t1\",\"result\":\"42\"}\n```".into(),
            seen: Mutex::new(vec![]),
        });
        let reasoner = LlmReasoner::new(llm.clone()).with_tools(r#"[{"name":"echo"}]"#);
        let mut state = SessionState::new("s", "answer the question");
        state.todo_list.add("compute", vec![]).unwrap();
        state.set_observation(serde_json::json!("partial"));

        let action = reasoner.propose_action(&state).await.unwrap();
        assert_eq!(
            action,
            Action::CompleteTask {
                task_id: "t1".into(),
                result: "42".into()
            }
        );
        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen[0].role, Role::System);
        assert!(seen[0].content.contains("\"echo\""));
        assert!(seen[1].content.contains("answer the question"));
        assert!(seen[1].content.contains("[ ] t1 compute"));
        assert!(seen[1].content.contains("partial"));
    }
}
