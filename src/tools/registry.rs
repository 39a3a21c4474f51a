//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / policy / execute），
//! 由 ToolRegistry 按名注册与查找；名称唯一，重复注册在启动期报错。
//! ToolExecutor 在调用时做 schema 校验、超时、输出截断并统一转 AgentError。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::core::AgentError;
use crate::tools::SafetyPolicy;

/// 工具 trait：名称、描述（供 reasoner 理解）、参数 schema、安全策略、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（InvokeTool 动作中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述
    fn description(&self) -> &str;

    /// 参数 JSON Schema；执行前据此校验，不符合即 SchemaViolation
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn policy(&self) -> SafetyPolicy {
        SafetyPolicy::PureCompute
    }

    /// 单次调用上限；None 时使用执行器的全局超时
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// 执行工具；超时由执行器负责，返回的 future 被丢弃即视为取消
    async fn execute(&self, args: Value) -> Result<String, AgentError>;
}

/// 工具的静态描述，注入 reasoner 上下文与日志
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub policy: SafetyPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ToolSpec {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
            policy: tool.policy(),
            timeout_ms: tool.timeout().map(|d| d.as_millis() as u64),
        }
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), AgentError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let name = tool.name().to_string();
        if name.trim().is_empty() {
            return Err(AgentError::ConfigError("tool name must not be empty".into()));
        }
        if self.tools.contains_key(&name) {
            return Err(AgentError::ConfigError(format!(
                "tool '{name}' registered twice"
            )));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn spec(&self, name: &str) -> Option<ToolSpec> {
        self.tools.get(name).map(|t| ToolSpec::of(t.as_ref()))
    }

    /// 按名称排序的全部工具描述
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| ToolSpec::of(t.as_ref())).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 已注册工具的 schema 列表（JSON 字符串），供 LLM reasoner 拼入 prompt
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .specs()
            .into_iter()
            .map(|s| {
                serde_json::json!({
                    "name": s.name,
                    "description": s.description,
                    "parameters": s.parameters
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
