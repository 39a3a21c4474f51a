//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__ORCHESTRATOR__MAX_PARALLEL_SESSIONS=4`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::BackoffPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub agent: AgentSection,
    pub orchestrator: OrchestratorSection,
    pub store: StoreSection,
    pub tools: ToolsSection,
    pub reasoner: ReasonerSection,
    pub analytics: AnalyticsSection,
}

/// [app] 段：应用名、沙箱根目录
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 沙箱根目录，未设置时用 ./agent_workspace；每个会话在其下拥有独立子目录
    pub workspace_root: Option<PathBuf>,
}

impl AppSection {
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("agent_workspace"))
    }
}

/// [agent] 段：单个推理循环的预算
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 迭代上限，保证在循环型 reasoner 下也能终止
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
    /// 墙钟上限（秒）
    #[serde(default = "default_max_wall_clock_secs")]
    pub max_wall_clock_secs: u64,
    /// 单次 reasoner 调用超时（秒）
    #[serde(default = "default_reasoner_timeout_secs")]
    pub reasoner_timeout_secs: u64,
}

fn default_max_iterations() -> u64 {
    20
}

fn default_max_wall_clock_secs() -> u64 {
    300
}

fn default_reasoner_timeout_secs() -> u64 {
    60
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_wall_clock_secs: default_max_wall_clock_secs(),
            reasoner_timeout_secs: default_reasoner_timeout_secs(),
        }
    }
}

/// [orchestrator] 段：并发上限
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_max_parallel_sessions")]
    pub max_parallel_sessions: usize,
}

fn default_max_parallel_sessions() -> usize {
    3
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_parallel_sessions: default_max_parallel_sessions(),
        }
    }
}

/// 任务存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// 本地 JSON 文件（单机 / 离线）
    #[default]
    File,
    /// SQLite 键值快照（分页 + 可选 TTL）
    Sqlite,
    /// 进程内（测试用）
    Memory,
}

/// [store] 段：后端选择、目录、TTL、检查点重试
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreBackend,
    /// 文件后端目录
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
    /// SQLite 数据库路径
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// 快照存活时间（秒），None 表示永久保留
    pub ttl_secs: Option<u64>,
    /// 检查点写入失败（StoreUnavailable）时的退避策略
    #[serde(default = "default_checkpoint_retry")]
    pub checkpoint_retry: BackoffPolicy,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("memory")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("memory/sessions.db")
}

fn default_checkpoint_retry() -> BackoffPolicy {
    BackoffPolicy::checkpoint_default()
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            dir: default_store_dir(),
            db_path: default_db_path(),
            ttl_secs: None,
            checkpoint_retry: default_checkpoint_retry(),
        }
    }
}

impl StoreSection {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

/// [tools] 段：启用的工具、超时、输出上限、Shell 白名单、Fetch 域名
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 启用的工具种类名（启动时校验，未知名称直接报错）
    #[serde(default = "default_enabled_tools")]
    pub enabled: Vec<String>,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// 工具输出最大字节数，超出截断
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// 为 true 时所有会话共享同一沙箱目录
    #[serde(default)]
    pub shared_workspace: bool,
    #[serde(default)]
    pub shell: ShellSection,
    #[serde(default)]
    pub fetch: FetchSection,
}

fn default_enabled_tools() -> Vec<String> {
    ["echo", "read_file", "write_file", "list_files", "delete_file"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            enabled: default_enabled_tools(),
            tool_timeout_secs: default_tool_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            shared_workspace: false,
            shell: ShellSection::default(),
            fetch: FetchSection::default(),
        }
    }
}

impl ToolsSection {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// [tools.shell] 段：允许执行的命令名（仅首词）
#[derive(Debug, Clone, Deserialize)]
pub struct ShellSection {
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
}

fn default_allowed_commands() -> Vec<String> {
    ["ls", "cat", "head", "tail", "wc", "grep", "echo"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
        }
    }
}

/// [tools.fetch] 段：抓取 URL 的超时、最大字符数、域名白名单
#[derive(Debug, Clone, Deserialize)]
pub struct FetchSection {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_max_result_chars() -> usize {
    8000
}

fn default_allowed_domains() -> Vec<String> {
    [
        "en.wikipedia.org",
        "docs.rs",
        "crates.io",
        "doc.rust-lang.org",
        "github.com",
        "raw.githubusercontent.com",
        "stackoverflow.com",
        "arxiv.org",
        "news.ycombinator.com",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            max_result_chars: default_max_result_chars(),
            allowed_domains: default_allowed_domains(),
        }
    }
}

/// [reasoner] 段：后端选择与限流重试
#[derive(Debug, Clone, Deserialize)]
pub struct ReasonerSection {
    /// openai / mock；openai 需 OPENAI_API_KEY
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 覆盖默认 system prompt
    pub system_prompt: Option<String>,
    #[serde(default = "default_reasoner_retry")]
    pub retry: BackoffPolicy,
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_reasoner_retry() -> BackoffPolicy {
    BackoffPolicy::reasoner_default()
}

impl Default for ReasonerSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            system_prompt: None,
            retry: default_reasoner_retry(),
        }
    }
}

/// [analytics] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsSection {
    /// 最近错误环形缓冲容量
    #[serde(default = "default_error_ring_capacity")]
    pub error_ring_capacity: usize,
}

fn default_error_ring_capacity() -> usize {
    64
}

impl Default for AnalyticsSection {
    fn default() -> Self {
        Self {
            error_ring_capacity: default_error_ring_capacity(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_iterations, 20);
        assert_eq!(cfg.orchestrator.max_parallel_sessions, 3);
        assert_eq!(cfg.store.backend, StoreBackend::File);
        assert!(cfg.tools.enabled.iter().any(|t| t == "read_file"));
        assert_eq!(cfg.reasoner.retry.max_attempts, 4);
    }

    #[test]
    fn test_load_explicit_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive.toml");
        std::fs::write(
            &path,
            "[agent]\nmax_iterations = 7\n\n[store]\nbackend = \"memory\"\nttl_secs = 60\n\n[tools]\nenabled = [\"echo\"]\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.max_iterations, 7);
        assert_eq!(cfg.agent.max_wall_clock_secs, 300);
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
        assert_eq!(cfg.store.ttl(), Some(Duration::from_secs(60)));
        assert_eq!(cfg.tools.enabled, vec!["echo".to_string()]);
    }
}
