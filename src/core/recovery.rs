//! 错误恢复引擎与退避策略
//!
//! 根据 AgentError 类型与已尝试次数返回 RecoveryAction，供推理循环决定是交还 reasoner、退避重试还是终止会话。

use std::time::Duration;

use serde::Deserialize;

use crate::core::AgentError;

/// 指数退避：delay(n) = min(base * multiplier^n, max)，最多 max_attempts 次尝试（含首次）
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackoffPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_max_attempts() -> u32 {
    4
}

impl BackoffPolicy {
    /// reasoner 限流重试：500ms 起，翻倍，封顶 8s，共 4 次
    pub fn reasoner_default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }

    /// 检查点写入重试：100ms 起，翻倍，封顶 2s，共 3 次
    pub fn checkpoint_default() -> Self {
        Self {
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 2_000,
            max_attempts: 3,
        }
    }

    /// 不等待的策略（测试用）
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            base_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
            max_attempts,
        }
    }

    /// 第 attempt 次失败（从 0 计）之后应等待的时长
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(32) as i32);
        let ms = (self.base_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// 第 attempt 次失败后是否还允许再试
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts.max(1)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::reasoner_default()
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 记录到对应任务并作为 observation 交还 reasoner（工具失败、非法动作）
    ReportToReasoner,
    /// 等待后重试同一操作（检查点写入）
    RetryAfter(Duration),
    /// 终止会话
    Abort,
}

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Clone, Default)]
pub struct RecoveryEngine {
    store_backoff: BackoffPolicy,
}

impl RecoveryEngine {
    pub fn new(store_backoff: BackoffPolicy) -> Self {
        Self { store_backoff }
    }

    pub fn store_backoff(&self) -> &BackoffPolicy {
        &self.store_backoff
    }

    /// attempt 为同一操作已失败的次数（从 0 计）
    pub fn handle(&self, err: &AgentError, attempt: u32) -> RecoveryAction {
        match err {
            e if e.is_local() => RecoveryAction::ReportToReasoner,
            AgentError::StoreUnavailable(_) if self.store_backoff.should_retry(attempt) => {
                RecoveryAction::RetryAfter(self.store_backoff.delay(attempt))
            }
            _ => RecoveryAction::Abort,
        }
    }
}
