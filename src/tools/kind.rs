//! 工具种类（封闭枚举）与按会话构建注册表的目录
//!
//! 配置中的工具名在启动时解析为 ToolKind，未知名称直接报错；
//! 每个会话得到独立的 ToolRegistry，沙箱工具的根目录为 workspace_root/session_id
//! （`shared_workspace = true` 时所有会话共享 workspace_root）。

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::config::ToolsSection;
use crate::core::AgentError;
use crate::session::is_valid_session_id;
use crate::tools::{
    DeleteFileTool, EchoTool, FetchTool, ListFilesTool, ReadFileTool, ShellTool, Tool,
    ToolRegistry, WriteFileTool,
};

/// 内置工具种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Echo,
    ReadFile,
    WriteFile,
    ListFiles,
    DeleteFile,
    Shell,
    Fetch,
}

impl ToolKind {
    pub const ALL: [ToolKind; 7] = [
        ToolKind::Echo,
        ToolKind::ReadFile,
        ToolKind::WriteFile,
        ToolKind::ListFiles,
        ToolKind::DeleteFile,
        ToolKind::Shell,
        ToolKind::Fetch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Echo => "echo",
            ToolKind::ReadFile => "read_file",
            ToolKind::WriteFile => "write_file",
            ToolKind::ListFiles => "list_files",
            ToolKind::DeleteFile => "delete_file",
            ToolKind::Shell => "shell",
            ToolKind::Fetch => "fetch",
        }
    }

    pub fn is_sandboxed(&self) -> bool {
        !matches!(self, ToolKind::Echo | ToolKind::Fetch)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ToolKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| AgentError::ConfigError(format!("unknown tool kind '{s}'")))
    }
}

/// 已校验的工具目录；Clone 开销低，可在会话间共享
#[derive(Clone)]
pub struct ToolCatalog {
    kinds: Vec<ToolKind>,
    extra: Vec<Arc<dyn Tool>>,
    workspace_root: PathBuf,
    cfg: Arc<ToolsSection>,
}

impl ToolCatalog {
    /// 解析并校验配置中的工具名
    pub fn from_config(cfg: &ToolsSection, workspace_root: impl AsRef<Path>) -> Result<Self, AgentError> {
        let mut kinds: Vec<ToolKind> = Vec::with_capacity(cfg.enabled.len());
        for name in &cfg.enabled {
            let kind: ToolKind = name.parse()?;
            if kinds.contains(&kind) {
                return Err(AgentError::ConfigError(format!("tool '{kind}' enabled twice")));
            }
            kinds.push(kind);
        }
        Ok(Self {
            kinds,
            extra: Vec::new(),
            workspace_root: workspace_root.as_ref().to_path_buf(),
            cfg: Arc::new(cfg.clone()),
        })
    }

    /// 追加一个进程内工具，所有会话共享同一实例；与内置工具重名时报错
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Result<Self, AgentError> {
        let name = tool.name();
        if self.kinds.iter().any(|k| k.as_str() == name) || self.extra.iter().any(|t| t.name() == name) {
            return Err(AgentError::ConfigError(format!("tool '{name}' registered twice")));
        }
        self.extra.push(tool);
        Ok(self)
    }

    pub fn kinds(&self) -> &[ToolKind] {
        &self.kinds
    }

    pub fn tools_section(&self) -> &ToolsSection {
        &self.cfg
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// 会话的沙箱根目录
    pub fn sandbox_root(&self, session_id: &str) -> Result<PathBuf, AgentError> {
        if self.cfg.shared_workspace {
            return Ok(self.workspace_root.clone());
        }
        if !is_valid_session_id(session_id) {
            return Err(AgentError::ConfigError(format!(
                "session id '{session_id}' cannot name a sandbox directory"
            )));
        }
        Ok(self.workspace_root.join(session_id))
    }

    /// 为会话创建沙箱目录并构建其工具注册表
    pub async fn build_for_session(&self, session_id: &str) -> Result<ToolRegistry, AgentError> {
        let root = self.sandbox_root(session_id)?;
        if self.kinds.iter().any(ToolKind::is_sandboxed) {
            tokio::fs::create_dir_all(&root).await.map_err(|e| {
                AgentError::ConfigError(format!("cannot create sandbox {:?}: {}", root, e))
            })?;
        }
        self.build_registry(&root)
    }

    /// 工具描述 JSON（供 reasoner 提示词），不创建任何目录
    pub fn schema_json(&self) -> Result<String, AgentError> {
        Ok(self.build_registry(&self.workspace_root)?.to_schema_json())
    }

    fn build_registry(&self, root: &Path) -> Result<ToolRegistry, AgentError> {
        let mut registry = ToolRegistry::new();
        for kind in &self.kinds {
            match kind {
                ToolKind::Echo => registry.register(EchoTool)?,
                ToolKind::ReadFile => registry.register(ReadFileTool::new(root))?,
                ToolKind::WriteFile => registry.register(WriteFileTool::new(root))?,
                ToolKind::ListFiles => registry.register(ListFilesTool::new(root))?,
                ToolKind::DeleteFile => registry.register(DeleteFileTool::new(root))?,
                ToolKind::Shell => registry.register(ShellTool::new(
                    self.cfg.shell.allowed_commands.clone(),
                    root,
                ))?,
                ToolKind::Fetch => registry.register(FetchTool::from_config(&self.cfg.fetch)?)?,
            }
        }
        for tool in &self.extra {
            registry.register_arc(tool.clone())?;
        }
        Ok(registry)
    }
}
