//! 分析采集器
//!
//! 只追加：工具调用计数（按工具名 × 结果类别）、每工具耗时直方图、会话终态计数、
//! 有界错误环形缓冲（满时淘汰最旧）。显式构造并注入，不做全局单例。
//! 一批事件在同一把锁内应用，snapshot 要么看到整批、要么一条都看不到。
//! 指标以 Arc<Metrics> 存放：snapshot 在锁内只克隆 Arc，写入方用 Arc::make_mut 写时复制，
//! 构造快照期间不阻塞记录。

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analytics::DurationHistogram;
use crate::config::AnalyticsSection;
use crate::core::ErrorClass;
use crate::session::SessionOutcome;
use crate::tools::{ToolInvocation, ToolOutcome};

/// 成功调用的结果类别键
pub const OUTCOME_SUCCESS: &str = "success";

/// 最近错误记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// 出错位置：工具名或 "session"
    pub source: String,
    pub class: ErrorClass,
    pub message: String,
}

/// 可记录的分析事件
#[derive(Debug, Clone)]
pub enum AnalyticsEvent {
    ToolCall {
        tool: String,
        outcome: String,
        duration: Duration,
    },
    SessionOutcome {
        outcome: String,
    },
    Error(ErrorRecord),
}

#[derive(Debug, Clone, Default)]
struct Metrics {
    tool_calls: BTreeMap<String, BTreeMap<String, u64>>,
    durations: BTreeMap<String, DurationHistogram>,
    session_outcomes: BTreeMap<String, u64>,
    recent_errors: VecDeque<ErrorRecord>,
    errors_total: u64,
}

/// 分析采集器；可在多个会话间共享（Arc）
#[derive(Debug)]
pub struct AnalyticsCollector {
    metrics: Mutex<Arc<Metrics>>,
    self_errors: AtomicU64,
    error_capacity: usize,
    started_at: DateTime<Utc>,
}

impl Default for AnalyticsCollector {
    fn default() -> Self {
        Self::new(AnalyticsSection::default().error_ring_capacity)
    }
}

impl AnalyticsCollector {
    pub fn new(error_capacity: usize) -> Self {
        Self {
            metrics: Mutex::new(Arc::new(Metrics::default())),
            self_errors: AtomicU64::new(0),
            error_capacity: error_capacity.max(1),
            started_at: Utc::now(),
        }
    }

    pub fn from_config(cfg: &AnalyticsSection) -> Self {
        Self::new(cfg.error_ring_capacity)
    }

    fn self_error(&self, reason: &str) {
        self.self_errors.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("analytics self-error: {}", reason);
    }

    /// 取锁；锁中毒时计一次自身错误并继续使用内部数据
    fn lock(&self) -> MutexGuard<'_, Arc<Metrics>> {
        match self.metrics.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                self.self_error("metrics lock poisoned");
                poisoned.into_inner()
            }
        }
    }

    fn is_valid(event: &AnalyticsEvent) -> bool {
        match event {
            AnalyticsEvent::ToolCall { tool, outcome, .. } => !tool.is_empty() && !outcome.is_empty(),
            AnalyticsEvent::SessionOutcome { outcome } => !outcome.is_empty(),
            AnalyticsEvent::Error(_) => true,
        }
    }

    fn apply(&self, m: &mut Metrics, event: AnalyticsEvent) {
        match event {
            AnalyticsEvent::ToolCall {
                tool,
                outcome,
                duration,
            } => {
                let count = m
                    .tool_calls
                    .entry(tool.clone())
                    .or_default()
                    .entry(outcome)
                    .or_insert(0);
                *count = count.saturating_add(1);
                m.durations.entry(tool).or_default().observe(duration);
            }
            AnalyticsEvent::SessionOutcome { outcome } => {
                let count = m.session_outcomes.entry(outcome).or_insert(0);
                *count = count.saturating_add(1);
            }
            AnalyticsEvent::Error(record) => {
                if m.recent_errors.len() >= self.error_capacity {
                    m.recent_errors.pop_front();
                }
                m.recent_errors.push_back(record);
                m.errors_total = m.errors_total.saturating_add(1);
            }
        }
    }

    pub fn record(&self, event: AnalyticsEvent) {
        self.record_batch(std::iter::once(event));
    }

    /// 原子地记录一批事件；批内任一事件非法则整批丢弃并计自身错误
    pub fn record_batch(&self, events: impl IntoIterator<Item = AnalyticsEvent>) {
        let events: Vec<AnalyticsEvent> = events.into_iter().collect();
        if events.is_empty() {
            return;
        }
        if !events.iter().all(Self::is_valid) {
            self.self_error("invalid analytics event");
            return;
        }
        let mut guard = self.lock();
        let m = Arc::make_mut(&mut guard);
        for event in events {
            self.apply(m, event);
        }
    }

    /// 记录一次工具调用（计数 + 耗时；失败时附带错误记录）
    pub fn record_tool(&self, session_id: Option<&str>, inv: &ToolInvocation) {
        let mut batch = vec![AnalyticsEvent::ToolCall {
            tool: inv.tool_name.clone(),
            outcome: inv.outcome.class_key().to_string(),
            duration: inv.duration,
        }];
        if let ToolOutcome::Failure { class, message } = &inv.outcome {
            batch.push(AnalyticsEvent::Error(ErrorRecord {
                at: inv.started_at,
                session_id: session_id.map(String::from),
                source: inv.tool_name.clone(),
                class: *class,
                message: message.clone(),
            }));
        }
        self.record_batch(batch);
    }

    /// 记录会话终态
    pub fn record_session(&self, session_id: &str, outcome: &SessionOutcome) {
        let mut batch = vec![AnalyticsEvent::SessionOutcome {
            outcome: outcome.class_key().to_string(),
        }];
        if let SessionOutcome::Failed { reason, message } = outcome {
            batch.push(AnalyticsEvent::Error(ErrorRecord {
                at: Utc::now(),
                session_id: Some(session_id.to_string()),
                source: "session".to_string(),
                class: *reason,
                message: message.clone(),
            }));
        }
        self.record_batch(batch);
    }

    pub fn record_error(&self, record: ErrorRecord) {
        self.record(AnalyticsEvent::Error(record));
    }

    pub fn self_error_count(&self) -> u64 {
        self.self_errors.load(Ordering::Relaxed)
    }

    /// 当前指标的共享引用；锁只持有到克隆 Arc 为止
    fn current(&self) -> Arc<Metrics> {
        Arc::clone(&self.lock())
    }

    /// 一致的时间点拷贝
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let m = self.current();
        AnalyticsSnapshot {
            started_at: self.started_at,
            taken_at: Utc::now(),
            tool_calls: m.tool_calls.clone(),
            durations: m.durations.clone(),
            session_outcomes: m.session_outcomes.clone(),
            recent_errors: m.recent_errors.iter().cloned().collect(),
            errors_total: m.errors_total,
            self_errors: self.self_error_count(),
        }
    }
}

/// 只读快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSnapshot {
    pub started_at: DateTime<Utc>,
    pub taken_at: DateTime<Utc>,
    /// 工具名 → 结果类别 → 次数
    pub tool_calls: BTreeMap<String, BTreeMap<String, u64>>,
    pub durations: BTreeMap<String, DurationHistogram>,
    /// "done" 或失败原因 → 会话数
    pub session_outcomes: BTreeMap<String, u64>,
    /// 最旧在前
    pub recent_errors: Vec<ErrorRecord>,
    pub errors_total: u64,
    pub self_errors: u64,
}

/// 面向人的汇总视图
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSummary {
    pub uptime_secs: f64,
    pub sessions_done: u64,
    pub sessions_failed: u64,
    /// 百分比，保留两位小数
    pub success_rate: f64,
    pub total_tool_calls: u64,
    pub failed_tool_calls: u64,
    pub most_used_tools: Vec<(String, u64)>,
    pub avg_tool_duration_ms: f64,
    pub total_errors: u64,
    pub calls_per_minute: f64,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

impl AnalyticsSnapshot {
    pub fn tool_count(&self, tool: &str, outcome: &str) -> u64 {
        self.tool_calls
            .get(tool)
            .and_then(|m| m.get(outcome))
            .copied()
            .unwrap_or(0)
    }

    pub fn tool_total(&self, tool: &str) -> u64 {
        self.tool_calls
            .get(tool)
            .map(|m| m.values().sum())
            .unwrap_or(0)
    }

    pub fn sessions_with(&self, outcome: &str) -> u64 {
        self.session_outcomes.get(outcome).copied().unwrap_or(0)
    }

    pub fn summary(&self) -> AnalyticsSummary {
        let sessions_done = self.sessions_with("done");
        let sessions_total: u64 = self.session_outcomes.values().sum();
        let sessions_failed = sessions_total - sessions_done;
        let success_rate = if sessions_total == 0 {
            0.0
        } else {
            round2(sessions_done as f64 / sessions_total as f64 * 100.0)
        };

        let mut per_tool: Vec<(String, u64)> = self
            .tool_calls
            .keys()
            .map(|t| (t.clone(), self.tool_total(t)))
            .collect();
        per_tool.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let total_tool_calls: u64 = per_tool.iter().map(|(_, c)| c).sum();
        let failed_tool_calls = total_tool_calls
            - self
                .tool_calls
                .values()
                .filter_map(|m| m.get(OUTCOME_SUCCESS))
                .sum::<u64>();
        per_tool.truncate(5);

        let (sum_ms, n) = self
            .durations
            .values()
            .fold((0u64, 0u64), |(s, n), h| (s + h.sum_ms(), n + h.count()));
        let avg_tool_duration_ms = if n == 0 { 0.0 } else { round2(sum_ms as f64 / n as f64) };

        let uptime_secs = (self.taken_at - self.started_at)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        let calls_per_minute = if uptime_secs > 0.0 {
            round2(total_tool_calls as f64 / (uptime_secs / 60.0))
        } else {
            0.0
        };

        AnalyticsSummary {
            uptime_secs: round2(uptime_secs),
            sessions_done,
            sessions_failed,
            success_rate,
            total_tool_calls,
            failed_tool_calls,
            most_used_tools: per_tool,
            avg_tool_duration_ms,
            total_errors: self.errors_total,
            calls_per_minute,
        }
    }

    /// 导出 JSON：汇总 + 明细
    pub fn to_json(&self) -> String {
        let doc = serde_json::json!({
            "started_at": self.started_at,
            "summary": self.summary(),
            "detailed_metrics": self,
        });
        serde_json::to_string_pretty(&doc).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_event(tool: &str, outcome: &str, ms: u64) -> AnalyticsEvent {
        AnalyticsEvent::ToolCall {
            tool: tool.into(),
            outcome: outcome.into(),
            duration: Duration::from_millis(ms),
        }
    }

    fn error(msg: &str) -> ErrorRecord {
        ErrorRecord {
            at: Utc::now(),
            session_id: None,
            source: "t".into(),
            class: ErrorClass::Timeout,
            message: msg.into(),
        }
    }

    #[test]
    fn test_counts_and_summary() {
        let c = AnalyticsCollector::new(8);
        c.record(tool_event("echo", OUTCOME_SUCCESS, 3));
        c.record(tool_event("echo", OUTCOME_SUCCESS, 5));
        c.record(tool_event("fetch", "timeout", 100));
        c.record_session("s1", &SessionOutcome::Done { summary: "ok".into() });
        c.record_session("s2", &SessionOutcome::failed(ErrorClass::Cancelled, "stop"));

        let snap = c.snapshot();
        assert_eq!(snap.tool_count("echo", OUTCOME_SUCCESS), 2);
        assert_eq!(snap.tool_count("fetch", "timeout"), 1);
        assert_eq!(snap.sessions_with("cancelled"), 1);
        let s = snap.summary();
        assert_eq!(s.total_tool_calls, 3);
        assert_eq!(s.failed_tool_calls, 1);
        assert_eq!(s.success_rate, 50.0);
        assert_eq!(s.most_used_tools[0], ("echo".to_string(), 2));
        assert_eq!(s.total_errors, 1);
        assert!(snap.to_json().contains("\"most_used_tools\""));
    }

    #[test]
    fn test_error_ring_evicts_oldest() {
        let c = AnalyticsCollector::new(2);
        for m in ["a", "b", "c"] {
            c.record_error(error(m));
        }
        let snap = c.snapshot();
        let msgs: Vec<_> = snap.recent_errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(msgs, vec!["b", "c"]);
        assert_eq!(snap.errors_total, 3);
    }

    #[test]
    fn test_invalid_batch_is_dropped_whole() {
        let c = AnalyticsCollector::new(4);
        c.record_batch(vec![tool_event("echo", OUTCOME_SUCCESS, 1), tool_event("", "x", 1)]);
        let snap = c.snapshot();
        assert!(snap.tool_calls.is_empty());
        assert_eq!(c.self_error_count(), 1);
    }

    #[test]
    fn test_batches_are_atomic_under_concurrency() {
        let c = std::sync::Arc::new(AnalyticsCollector::new(4));
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let c = c.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        c.record_batch(vec![
                            tool_event("a", OUTCOME_SUCCESS, 1),
                            tool_event("b", OUTCOME_SUCCESS, 1),
                        ]);
                    }
                })
            })
            .collect();
        for _ in 0..200 {
            let snap = c.snapshot();
            assert_eq!(snap.tool_total("a"), snap.tool_total("b"));
        }
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(c.snapshot().tool_total("a"), 800);
    }

    #[test]
    fn test_writers_progress_while_snapshot_held() {
        let c = std::sync::Arc::new(AnalyticsCollector::new(4));
        c.record(tool_event("a", OUTCOME_SUCCESS, 1));
        let held = c.current();

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let c = c.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        c.record_batch(vec![
                            tool_event("a", OUTCOME_SUCCESS, 1),
                            tool_event("b", OUTCOME_SUCCESS, 1),
                        ]);
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        assert_eq!(held.tool_calls["a"][OUTCOME_SUCCESS], 1);
        assert!(!held.tool_calls.contains_key("b"));
        let snap = c.snapshot();
        assert_eq!(snap.tool_total("a"), 401);
        assert_eq!(snap.tool_total("b"), 400);
        drop(held);
    }
}
