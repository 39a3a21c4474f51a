//! Fetch 工具：域名白名单、超时、结果大小限制
//!
//! 仅允许配置中的域名（及其子域名）；GET 请求带超时与 User-Agent；
//! 响应超过 max_result_chars 时截断并追加 ...[truncated]。
//! 对 HTML 响应使用 html2text 提取可读文本，去除标签与脚本。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::config::FetchSection;
use crate::core::AgentError;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::{SafetyPolicy, Tool};

const USER_AGENT: &str = concat!("hive/", env!("CARGO_PKG_VERSION"));
const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct FetchArgs {
    /// http(s) URL，域名必须在白名单中
    url: String,
}

/// Fetch 工具：抓取 URL 内容，仅允许白名单域名
pub struct FetchTool {
    client: Client,
    allowed_domains: Arc<HashSet<String>>,
    max_result_chars: usize,
    timeout: Duration,
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 判断内容是否像 HTML（需提取可读文本）
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let head: String = s.chars().take(512).collect::<String>().to_lowercase();
    head.starts_with("<!") || head.starts_with("<html") || head.contains("<head") || head.contains("<body")
}

/// 从 URL 中提取 host（仅 http/https）
fn extract_domain(url: &str) -> Option<String> {
    let url = Url::parse(url.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.host_str()
        .filter(|h| !h.is_empty())
        .map(|h| h.trim_end_matches('.').to_lowercase())
}

/// host 等于白名单域名或为其子域名
fn domain_allowed(allowed_domains: &HashSet<String>, domain: &str) -> bool {
    allowed_domains
        .iter()
        .any(|d| domain == d || domain.ends_with(&format!(".{d}")))
}

/// 每一跳重定向都重新校验白名单，最多跟随 MAX_REDIRECTS 次
fn redirect_policy(allowed_domains: Arc<HashSet<String>>) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        match extract_domain(attempt.url().as_str()) {
            Some(domain) if domain_allowed(&allowed_domains, &domain) => attempt.follow(),
            Some(domain) => attempt.error(format!("redirect to non-allowlisted domain: {domain}")),
            None => attempt.error("redirect to non-http URL"),
        }
    })
}

impl FetchTool {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_result_chars: usize) -> Result<Self, AgentError> {
        let allowed_domains: Arc<HashSet<String>> = Arc::new(
            allowed_domains
                .into_iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en;q=0.9,zh-CN;q=0.8"));
        let timeout = Duration::from_secs(timeout_secs.max(1));
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .redirect(redirect_policy(allowed_domains.clone()))
            .build()
            .map_err(|e| AgentError::ConfigError(format!("fetch client: {e}")))?;
        Ok(Self {
            client,
            allowed_domains,
            max_result_chars,
            timeout,
        })
    }

    pub fn from_config(cfg: &FetchSection) -> Result<Self, AgentError> {
        Self::new(cfg.allowed_domains.clone(), cfg.timeout_secs, cfg.max_result_chars)
    }

    fn is_allowed(&self, url: &str) -> Result<(), AgentError> {
        let domain = extract_domain(url).ok_or_else(|| AgentError::SchemaViolation {
            tool: "fetch".into(),
            reason: format!("invalid or non-http URL: {url}"),
        })?;
        if domain_allowed(&self.allowed_domains, &domain) {
            Ok(())
        } else {
            Err(AgentError::ToolExecutionFailed(format!(
                "Domain not in allowlist: {}",
                domain
            )))
        }
    }

    /// 将 HTML 转为可读文本（去除 script/style 等）
    fn html_to_text(&self, html: &str) -> String {
        match from_read(html.as_bytes(), 120) {
            Ok(text) if !text.trim().is_empty() => text,
            _ => strip_html_tags(html),
        }
    }

    fn truncate(&self, body: String) -> String {
        if body.chars().count() > self.max_result_chars {
            body.chars().take(self.max_result_chars).collect::<String>() + "\n...[truncated]"
        } else {
            body
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, AgentError> {
        self.is_allowed(url)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Request failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(AgentError::ToolExecutionFailed(format!("HTTP {}", resp.status())));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Read body: {}", e)))?;
        let body = body.trim_start_matches('\u{FEFF}');

        let text = if looks_like_html(body) {
            self.html_to_text(body)
        } else {
            body.to_string()
        };
        Ok(self.truncate(text))
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page or API response from an allow-listed domain. Args: {\"url\": \"https://...\"}"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<FetchArgs>()
    }

    fn policy(&self) -> SafetyPolicy {
        let mut allowed_domains: Vec<String> = self.allowed_domains.iter().cloned().collect();
        allowed_domains.sort();
        SafetyPolicy::NetworkRestricted { allowed_domains }
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let args: FetchArgs = parse_args(self.name(), args)?;
        tracing::info!(url = %args.url, "fetch tool");
        self.fetch(args.url.trim()).await
    }
}
