//! 可观测性：tracing 订阅器初始化
//!
//! 默认级别由调用方给出，RUST_LOG 可覆盖（如 `RUST_LOG=hive=debug`）。
//! 工具审计行（event = "tool_audit"）同样走这里的 fmt 输出。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局订阅器；重复调用时忽略（测试中多次初始化）
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}
