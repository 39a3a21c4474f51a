//! 目标拆分：把顶层目标拆成相互独立的子目标，每个子目标一个会话

use async_trait::async_trait;

use crate::core::AgentError;

/// 规划能力：goal → 子目标列表（空列表时编排器退化为单一子目标）
#[async_trait]
pub trait GoalDecomposer: Send + Sync {
    async fn decompose(&self, goal: &str) -> Result<Vec<String>, AgentError>;
}

/// 按行或分号拆分，去掉列表前缀（"- "、"* "、"1. "）
#[derive(Debug, Default, Clone, Copy)]
pub struct LineDecomposer;

fn strip_bullet(s: &str) -> &str {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix("- ").or_else(|| s.strip_prefix("* ")) {
        return rest.trim();
    }
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(rest) = s[digits..].strip_prefix(". ").or_else(|| s[digits..].strip_prefix(") ")) {
            return rest.trim();
        }
    }
    s
}

#[async_trait]
impl GoalDecomposer for LineDecomposer {
    async fn decompose(&self, goal: &str) -> Result<Vec<String>, AgentError> {
        Ok(goal
            .split(|c| c == '\n' || c == ';')
            .map(strip_bullet)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect())
    }
}

/// 不拆分：整个目标作为唯一子目标
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleGoal;

#[async_trait]
impl GoalDecomposer for SingleGoal {
    async fn decompose(&self, goal: &str) -> Result<Vec<String>, AgentError> {
        Ok(vec![goal.trim().to_string()])
    }
}
