//! Hive 命令行入口
//!
//! `run` 提交目标并等待全部子会话结束（Ctrl+C 取消整个任务），
//! `sessions` / `show` 读取任务存储中的会话快照。

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hive::config::load_config;
use hive::{observability, Orchestrator, SessionOutcome};

#[derive(Parser)]
#[command(name = "hive", version, about = "Autonomous task orchestration core")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(short, long, global = true, env = "HIVE_CONFIG")]
    config: Option<PathBuf>,

    /// 默认日志级别，RUST_LOG 优先
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 提交目标（多行或分号分隔的子目标并发执行）并等待结果
    Run {
        goal: String,
        /// 结束后输出分析数据（JSON）
        #[arg(long)]
        analytics: bool,
    },
    /// 分页列出已存储的会话
    Sessions {
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// 打印会话完整快照
    Show { session_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    observability::init(&cli.log_level);

    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;
    let orchestrator = Orchestrator::from_config(&cfg)
        .await
        .context("Failed to create orchestrator")?;

    match cli.command {
        Command::Run { goal, analytics } => cmd_run(&orchestrator, &goal, analytics).await,
        Command::Sessions { cursor, limit } => cmd_sessions(&orchestrator, cursor.as_deref(), limit).await,
        Command::Show { session_id } => cmd_show(&orchestrator, &session_id).await,
    }
}

async fn cmd_run(orchestrator: &Orchestrator, goal: &str, analytics: bool) -> Result<()> {
    let job_id = orchestrator.submit_goal(goal).await.context("Failed to submit goal")?;
    println!("job {job_id}");

    let job = tokio::select! {
        job = orchestrator.wait_job(&job_id) => job?,
        _ = tokio::signal::ctrl_c() => {
            let n = orchestrator.cancel_job(&job_id).await;
            eprintln!("cancelling {n} session(s)...");
            orchestrator.wait_job(&job_id).await?
        }
    };

    for id in &job.subtasks {
        let sub_goal = job.sub_goals.get(id).map(String::as_str).unwrap_or_default();
        match job.results.get(id) {
            Some(SessionOutcome::Done { summary }) => println!("  [done]   {id}  {sub_goal}\n           {summary}"),
            Some(SessionOutcome::Failed { reason, message }) => {
                println!("  [failed] {id}  {sub_goal}\n           {reason}: {message}")
            }
            None => println!("  [?]      {id}  {sub_goal}"),
        }
    }
    println!("status: {:?}", job.aggregate_status);

    if analytics {
        println!("{}", orchestrator.analytics().snapshot().to_json());
    }
    Ok(())
}

async fn cmd_sessions(orchestrator: &Orchestrator, cursor: Option<&str>, limit: usize) -> Result<()> {
    let page = orchestrator
        .list_sessions(cursor, limit)
        .await
        .context("Failed to list sessions")?;
    for s in &page.sessions {
        let status = match &s.outcome {
            Some(o) => o.class_key(),
            None => "running",
        };
        println!(
            "{}  {:<16} tasks={:<3} iters={:<3} {}  {}",
            s.session_id,
            status,
            s.todo_count,
            s.iteration_count,
            s.last_updated.format("%Y-%m-%d %H:%M:%S"),
            s.goal
        );
    }
    if let Some(next) = page.next_cursor {
        println!("next: --cursor {next}");
    }
    Ok(())
}

async fn cmd_show(orchestrator: &Orchestrator, session_id: &str) -> Result<()> {
    let state = orchestrator
        .load_session(session_id)
        .await
        .with_context(|| format!("Failed to load session {session_id}"))?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
