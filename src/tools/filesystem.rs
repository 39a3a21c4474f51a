//! 沙箱文件系统工具
//!
//! SafeFs 绑定 root_dir，所有路径先做词法规整（拒绝绝对路径与越过根的 ..），
//! 再对最近的已存在祖先做 canonicalize，校验仍在 root 下（防符号链接逃逸）。
//! read_file / write_file / list_files / delete_file 基于 SafeFs，副作用不会离开 root。

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::{SafetyPolicy, Tool};

/// 单文件读取上限
pub const MAX_READ_BYTES: u64 = 1024 * 1024;

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

fn io_failed(action: &str, path: &str, e: std::io::Error) -> AgentError {
    if e.kind() == ErrorKind::NotFound {
        AgentError::ToolExecutionFailed(format!("{action} failed: path not found: {path}"))
    } else {
        AgentError::ToolExecutionFailed(format!("{action} failed for {path}: {e}"))
    }
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 将相对路径解析为根下的绝对路径；逃逸时返回 PathEscape
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let raw = path.trim();
        let escape = || AgentError::PathEscape(raw.to_string());

        let mut normalized = PathBuf::new();
        for comp in Path::new(raw).components() {
            match comp {
                Component::Normal(c) => normalized.push(c),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(escape()); // 如 ../../etc/passwd
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(escape()),
            }
        }
        let full = self.root_dir.join(&normalized);

        let root_canon = self.root_dir.canonicalize().map_err(|e| {
            AgentError::ToolExecutionFailed(format!(
                "sandbox root {:?} unavailable: {}",
                self.root_dir, e
            ))
        })?;
        let mut probe = full.as_path();
        loop {
            match probe.canonicalize() {
                Ok(canon) => {
                    if canon.starts_with(&root_canon) {
                        return Ok(full);
                    }
                    return Err(escape());
                }
                Err(_) => match probe.parent() {
                    Some(parent) => probe = parent,
                    None => return Err(escape()),
                },
            }
        }
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }

    pub async fn read_file(&self, path: &str) -> Result<String, AgentError> {
        let resolved = self.resolve(path)?;
        let meta = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| io_failed("Read", path, e))?;
        if meta.is_dir() {
            return Err(AgentError::ToolExecutionFailed(format!("{path} is a directory")));
        }
        if meta.len() > MAX_READ_BYTES {
            return Err(AgentError::ToolExecutionFailed(format!(
                "{path} is {} bytes, limit is {MAX_READ_BYTES}",
                meta.len()
            )));
        }
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| io_failed("Read", path, e))
    }

    pub async fn write_file(&self, path: &str, content: &str, append: bool) -> Result<usize, AgentError> {
        let resolved = self.resolve(path)?;
        if resolved == self.root_dir {
            return Err(AgentError::ToolExecutionFailed("cannot write to sandbox root".into()));
        }
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failed("Write", path, e))?;
        }
        if append {
            use tokio::io::AsyncWriteExt;
            let mut f = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&resolved)
                .await
                .map_err(|e| io_failed("Write", path, e))?;
            f.write_all(content.as_bytes())
                .await
                .map_err(|e| io_failed("Write", path, e))?;
        } else {
            tokio::fs::write(&resolved, content)
                .await
                .map_err(|e| io_failed("Write", path, e))?;
        }
        Ok(content.len())
    }

    pub async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, AgentError> {
        let base = self.resolve(path)?;
        let mut rd = tokio::fs::read_dir(&base)
            .await
            .map_err(|e| io_failed("List", path, e))?;
        let mut entries = Vec::new();
        while let Some(e) = rd
            .next_entry()
            .await
            .map_err(|e| io_failed("List", path, e))?
        {
            let name = e.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let meta = e.metadata().await.ok();
            entries.push(DirEntry {
                path: self.relative(&e.path()),
                is_dir: meta.as_ref().map(|m| m.is_dir()).unwrap_or(false),
                size: meta.map(|m| m.len()).unwrap_or(0),
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    pub async fn delete(&self, path: &str) -> Result<(), AgentError> {
        let resolved = self.resolve(path)?;
        if resolved == self.root_dir {
            return Err(AgentError::ToolExecutionFailed("cannot delete sandbox root".into()));
        }
        let meta = tokio::fs::symlink_metadata(&resolved)
            .await
            .map_err(|e| io_failed("Delete", path, e))?;
        let removed = if meta.is_dir() {
            // 只删除空目录
            tokio::fs::remove_dir(&resolved).await
        } else {
            tokio::fs::remove_file(&resolved).await
        };
        removed.map_err(|e| io_failed("Delete", path, e))
    }
}

/// list_files 的条目
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirEntry {
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct PathArgs {
    /// 相对沙箱根目录的路径
    path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct WriteArgs {
    /// 相对沙箱根目录的路径
    path: String,
    content: String,
    /// 追加而非覆盖
    #[serde(default)]
    append: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct ListArgs {
    /// 目录路径，默认 "."
    #[serde(default)]
    path: Option<String>,
}

fn sandboxed(fs: &SafeFs) -> SafetyPolicy {
    SafetyPolicy::FilesystemSandboxed {
        root: fs.root().to_path_buf(),
    }
}

/// 读取文件内容
pub struct ReadFileTool {
    fs: SafeFs,
}

impl ReadFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the session workspace. Args: {\"path\": \"relative path\"}"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<PathArgs>()
    }

    fn policy(&self) -> SafetyPolicy {
        sandboxed(&self.fs)
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let args: PathArgs = parse_args(self.name(), args)?;
        tracing::debug!(path = %args.path, "read_file");
        self.fs.read_file(&args.path).await
    }
}

/// 写入（或追加）文件，自动创建父目录
pub struct WriteFileTool {
    fs: SafeFs,
}

impl WriteFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text to a file in the session workspace. Args: {\"path\": \"relative path\", \"content\": \"text\", \"append\": false}"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<WriteArgs>()
    }

    fn policy(&self) -> SafetyPolicy {
        sandboxed(&self.fs)
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let args: WriteArgs = parse_args(self.name(), args)?;
        let written = self
            .fs
            .write_file(&args.path, &args.content, args.append.unwrap_or(false))
            .await?;
        tracing::debug!(path = %args.path, bytes = written, "write_file");
        Ok(serde_json::json!({ "path": args.path, "bytes_written": written }).to_string())
    }
}

/// 列出目录
pub struct ListFilesTool {
    fs: SafeFs,
}

impl ListFilesTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List a directory in the session workspace. Args: {\"path\": \"directory, default '.'\"}"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ListArgs>()
    }

    fn policy(&self) -> SafetyPolicy {
        sandboxed(&self.fs)
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let args: ListArgs = parse_args(self.name(), args)?;
        let path = args.path.unwrap_or_else(|| ".".to_string());
        let entries = self.fs.list_dir(&path).await?;
        serde_json::to_string(&entries).map_err(|e| AgentError::Internal(e.to_string()))
    }
}

/// 删除文件或空目录
pub struct DeleteFileTool {
    fs: SafeFs,
}

impl DeleteFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file (or empty directory) in the session workspace. Args: {\"path\": \"relative path\"}"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<PathArgs>()
    }

    fn policy(&self) -> SafetyPolicy {
        sandboxed(&self.fs)
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let args: PathArgs = parse_args(self.name(), args)?;
        self.fs.delete(&args.path).await?;
        tracing::debug!(path = %args.path, "delete_file");
        Ok(serde_json::json!({ "deleted": args.path }).to_string())
    }
}
