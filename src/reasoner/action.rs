//! Reasoner 提出的下一步动作
//!
//! 线上格式为带 "action" 标签的 JSON，例如：
//! `{"action": "invoke_tool", "tool": "read_file", "args": {"path": "a.txt"}, "task_id": "t1"}`

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reasoner::ReasonerError;
use crate::session::TaskId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// 追加任务；depends_on 中的任务必须已存在
    AddTask {
        description: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        depends_on: Vec<TaskId>,
    },
    /// 以结果完成任务（pending 任务会先被置为 in_progress）
    CompleteTask { task_id: TaskId, result: String },
    /// 调用工具；task_id 缺省时循环自动创建一个任务承载本次调用
    InvokeTool {
        tool: String,
        #[serde(default)]
        args: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
    },
    /// 宣告会话完成
    Finish { summary: String },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::AddTask { .. } => "add_task",
            Action::CompleteTask { .. } => "complete_task",
            Action::InvokeTool { .. } => "invoke_tool",
            Action::Finish { .. } => "finish",
        }
    }
}

/// Action 的 JSON Schema，拼入 LLM system prompt
pub fn action_schema_json() -> String {
    let schema = schema_for!(Action);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 从模型输出中提取并解析动作（```json 代码块或首个 { 到末个 }）
pub fn parse_action(output: &str) -> Result<Action, ReasonerError> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            &trimmed[start..=end]
        } else {
            trimmed
        }
    } else {
        return Err(ReasonerError::Malformed(format!(
            "no JSON action in output: {}",
            preview(trimmed)
        )));
    };

    serde_json::from_str(json_str)
        .map_err(|e| ReasonerError::Malformed(format!("{}: {}", e, preview(json_str))))
}

fn preview(s: &str) -> String {
    if s.chars().count() > 160 {
        format!("{}...", s.chars().take(160).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_fenced_and_bare_json() {
        let a = parse_action("Thinking...\n```json\n{\"action\": \"finish\", \"summary\": \"ok\"}\n```").unwrap();
        assert_eq!(a, Action::Finish { summary: "ok".into() });

        let a = parse_action(r#"Next: {"action":"invoke_tool","tool":"echo","args":{"text":"hi"}} done"#).unwrap();
        assert_eq!(
            a,
            Action::InvokeTool {
                tool: "echo".into(),
                args: json!({"text": "hi"}),
                task_id: None
            }
        );
    }

    #[test]
    fn test_add_task_defaults_dependencies() {
        let a = parse_action(r#"{"action":"add_task","description":"write report"}"#).unwrap();
        assert_eq!(
            a,
            Action::AddTask {
                description: "write report".into(),
                depends_on: vec![]
            }
        );
    }

    #[test]
    fn test_malformed_output() {
        assert!(matches!(parse_action("I am not sure"), Err(ReasonerError::Malformed(_))));
        assert!(matches!(
            parse_action(r#"{"action":"dance"}"#),
            Err(ReasonerError::Malformed(_))
        ));
    }

    #[test]
    fn test_schema_mentions_every_action() {
        let s = action_schema_json();
        for kind in ["add_task", "complete_task", "invoke_tool", "finish"] {
            assert!(s.contains(kind), "{kind}");
        }
    }
}
