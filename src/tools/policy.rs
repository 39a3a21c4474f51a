//! 工具安全策略标签

use std::path::PathBuf;

use serde::Serialize;

/// 工具声明的副作用边界
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SafetyPolicy {
    /// 文件副作用限制在 root 之内
    FilesystemSandboxed { root: PathBuf },
    /// 仅允许访问白名单域名
    NetworkRestricted { allowed_domains: Vec<String> },
    /// 无外部副作用
    PureCompute,
}

impl SafetyPolicy {
    pub fn tag(&self) -> &'static str {
        match self {
            SafetyPolicy::FilesystemSandboxed { .. } => "filesystem_sandboxed",
            SafetyPolicy::NetworkRestricted { .. } => "network_restricted",
            SafetyPolicy::PureCompute => "pure_compute",
        }
    }
}
