//! Hive - Rust 自主任务编排核心
//!
//! 模块划分：
//! - **session**: Task、TodoList（依赖 DAG）、SessionState 快照模型
//! - **store**: 任务存储抽象与实现（文件 / SQLite / 内存）
//! - **tools**: 工具注册表、参数 schema 校验、沙箱文件工具、shell、fetch 与执行器
//! - **reasoner**: 动作模型、Reasoner 抽象、LLM 实现与重试
//! - **react**: 推理循环（Thinking → Acting → Checkpointing）
//! - **core**: 错误与恢复、会话监管与调度、编排器
//! - **analytics**: 工具调用 / 会话结果统计与最近错误
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **observability**: tracing 初始化

pub mod analytics;
pub mod config;
pub mod core;
pub mod observability;
pub mod react;
pub mod reasoner;
pub mod session;
pub mod store;
pub mod tools;

pub use crate::core::{AgentError, AggregateStatus, OrchestrationJob, Orchestrator};
pub use crate::session::{SessionOutcome, SessionState};
