//! 分析采集：工具调用、耗时、会话终态、最近错误

pub mod collector;
pub mod histogram;

pub use collector::{
    AnalyticsCollector, AnalyticsEvent, AnalyticsSnapshot, AnalyticsSummary, ErrorRecord,
    OUTCOME_SUCCESS,
};
pub use histogram::DurationHistogram;
