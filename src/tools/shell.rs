//! Shell 代码执行：白名单命令，工作目录固定为会话沙箱
//!
//! 每个以 ; | & 分隔的片段首词都必须在白名单中，解释器一律拒绝；禁止 rm -rf、wget、chmod 777 等子串。
//! 参数按空白、重定向符、引号与 = 切分后逐段检查：绝对路径、~、..（含 .* 之类通配）、
//! 变量展开 $ 与反斜杠都视为沙箱逃逸。子进程设置 kill_on_drop，
//! 执行器超时或会话取消丢弃 future 时子进程随之被杀。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use crate::core::AgentError;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::{SafetyPolicy, Tool};

/// 禁止的命令/子串（即使白名单中有同名，也不允许带这些参数）
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "rm -r",
    "wget ",
    "curl | sh",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "`",
    ":(){ :|:& };:", // fork bomb
];

/// 可执行任意代码的解释器，沙箱内不允许（路径无法静态检查）
const INTERPRETERS: &[&str] = &[
    "sh", "bash", "zsh", "dash", "fish", "python", "python3", "node", "perl", "ruby", "php", "lua",
    "env", "xargs", "eval", "exec", "awk", "sed", "find",
];

/// 参数切分符：空白之外的重定向、引号、赋值与括号
fn is_piece_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '<' | '>' | '=' | '\'' | '"' | '(' | ')' | ',')
}

/// 片段是否可能指向沙箱之外
fn escapes_root(piece: &str) -> bool {
    piece.starts_with('/')
        || piece.starts_with('~')
        || piece.contains('$')
        || piece.contains('\\')
        || piece.split('/').any(|part| {
            part.starts_with("..")
                || (part.len() > 1
                    && part.starts_with('.')
                    && part.chars().all(|c| matches!(c, '.' | '*' | '?' | '[' | ']')))
        })
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct ShellArgs {
    /// 要执行的命令（首词必须在白名单中）
    command: String,
}

/// Shell 工具：仅允许白名单内命令，在沙箱目录中执行
pub struct ShellTool {
    allowed_commands: HashSet<String>,
    root_dir: PathBuf,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>, root_dir: impl AsRef<Path>) -> Self {
        let allowed_commands = allowed_commands
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect();
        Self {
            allowed_commands,
            root_dir: root_dir.as_ref().to_path_buf(),
        }
    }

    fn check(&self, raw: &str) -> Result<(), AgentError> {
        let raw_lower = raw.to_lowercase();
        for forbidden in FORBIDDEN_SUBSTR {
            if raw_lower.contains(forbidden) {
                return Err(AgentError::ToolExecutionFailed(format!(
                    "Forbidden pattern: {}",
                    forbidden
                )));
            }
        }

        let mut segments = 0;
        for segment in raw_lower.split(|c| c == ';' || c == '|' || c == '&') {
            let mut pieces = segment.split(is_piece_separator).filter(|p| !p.is_empty());
            let Some(name) = pieces.next() else { continue };
            segments += 1;
            if INTERPRETERS.contains(&name) {
                return Err(AgentError::ToolExecutionFailed(format!(
                    "Interpreter '{}' not allowed in sandbox",
                    name
                )));
            }
            if !self.allowed_commands.contains(name) {
                return Err(AgentError::ToolExecutionFailed(format!(
                    "Command '{}' not in allowlist",
                    name
                )));
            }
            if let Some(piece) = pieces.find(|p| escapes_root(p)) {
                return Err(AgentError::PathEscape(piece.to_string()));
            }
        }
        if segments == 0 {
            return Err(AgentError::ToolExecutionFailed("Empty command".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run an allow-listed shell command inside the session workspace. Args: {\"command\": \"ls -la\"}"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ShellArgs>()
    }

    fn policy(&self) -> SafetyPolicy {
        SafetyPolicy::FilesystemSandboxed {
            root: self.root_dir.clone(),
        }
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let args: ShellArgs = parse_args(self.name(), args)?;
        let command = args.command.trim();
        self.check(command)?;

        tracing::info!(command = %command, cwd = ?self.root_dir, "shell tool execute");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.root_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = cmd
            .output()
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Execution failed: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(AgentError::ToolExecutionFailed(format!(
                "Exit {:?}\nstderr: {}",
                output.status.code(),
                stderr.trim()
            )));
        }
        Ok(if stderr.is_empty() {
            stdout
        } else {
            format!("{}\nstderr: {}", stdout.trim(), stderr.trim())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(root: &Path) -> ShellTool {
        ShellTool::new(vec!["echo".into(), "ls".into(), "cat".into()], root)
    }

    #[test]
    fn test_allowlist_and_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let t = tool(dir.path());
        assert!(t.check("ls -la").is_ok());
        assert!(t.check("echo hi | cat").is_ok());
        assert!(t.check("python -c 1").is_err());
        assert!(t.check("ls; rm -rf x").is_err());
        assert!(t.check("echo $(whoami)").is_err());
        assert!(t.check("echo ok > out.txt").is_ok());
        assert!(t.check("cat notes/a.txt").is_ok());
        assert!(t.check("   ").is_err());
    }

    #[test]
    fn test_path_arguments_escape() {
        let dir = tempfile::tempdir().unwrap();
        let t = tool(dir.path());
        for bad in [
            "cat /etc/passwd",
            "ls ..",
            "cat ../x",
            "ls ~",
            "echo x >/tmp/y",
            "echo x>../y",
            "cat a</etc/passwd",
            "ls $HOME",
            "echo \"$PWD\"",
            "cat --file=/etc/hosts",
            "cat 'notes/../../x'",
            "ls .*",
            "cat .\\./x",
        ] {
            assert!(
                matches!(t.check(bad), Err(AgentError::PathEscape(_))),
                "{bad} should escape"
            );
        }
    }

    #[test]
    fn test_interpreters_refused_even_when_allowlisted() {
        let dir = tempfile::tempdir().unwrap();
        let t = ShellTool::new(vec!["python3".into(), "echo".into()], dir.path());
        let err = t.check("python3 -c \"open('/etc/x','w')\"").unwrap_err();
        assert!(matches!(err, AgentError::ToolExecutionFailed(_)));
        assert!(t.check("echo hi | python3").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_glued_redirect_does_not_write_outside() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("ws");
        std::fs::create_dir(&root).unwrap();
        let err = tool(&root)
            .execute(json!({"command": "echo pwned>../outside.txt"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::PathEscape(_)));
        assert!(!parent.path().join("outside.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_in_sandbox_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let out = tool(dir.path())
            .execute(json!({"command": "ls"}))
            .await
            .unwrap();
        assert!(out.contains("marker.txt"));
    }
}
