//! 编排器集成测试：汇总状态、有界并发、FIFO、取消、重试与 panic 隔离

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use hive::config::ToolsSection;
use hive::core::{AgentError, AggregateStatus, ErrorClass, Orchestrator};
use hive::reasoner::{Action, FnReasoner, Reasoner, ReasonerError};
use hive::session::{SessionOutcome, SessionState};
use hive::store::{MemoryTaskStore, TaskStore};
use hive::tools::{Tool, ToolCatalog};

/// 记录同时执行中的调用数峰值
#[derive(Default)]
struct GaugeTool {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Tool for GaugeTool {
    fn name(&self) -> &str {
        "gauge"
    }

    fn description(&self) -> &str {
        "measures concurrency"
    }

    async fn execute(&self, _args: Value) -> Result<String, AgentError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok("measured".into())
    }
}

struct BlockingTool {
    started: Arc<Notify>,
}

#[async_trait]
impl Tool for BlockingTool {
    fn name(&self) -> &str {
        "block"
    }

    fn description(&self) -> &str {
        "blocks until cancelled"
    }

    async fn execute(&self, _args: Value) -> Result<String, AgentError> {
        self.started.notify_one();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("unreachable".into())
    }
}

/// 第一轮调用指定工具，第二轮 Finish
fn invoke_then_finish(tool: &'static str) -> impl Fn(&SessionState) -> Result<Action, ReasonerError> + Send + Sync {
    move |s: &SessionState| {
        if s.iteration_count == 0 {
            Ok(Action::InvokeTool {
                tool: tool.into(),
                args: json!({}),
                task_id: None,
            })
        } else {
            Ok(Action::Finish {
                summary: format!("finished {}", s.goal),
            })
        }
    }
}

struct Harness {
    orch: Orchestrator,
    workspace: tempfile::TempDir,
    store: Arc<dyn TaskStore>,
}

fn harness(reasoner: Arc<dyn Reasoner>, tools: Vec<Arc<dyn Tool>>, enabled: &[&str], max_parallel: usize) -> Harness {
    let workspace = tempfile::tempdir().unwrap();
    let cfg = ToolsSection {
        enabled: enabled.iter().map(|s| s.to_string()).collect(),
        ..ToolsSection::default()
    };
    let mut catalog = ToolCatalog::from_config(&cfg, workspace.path()).unwrap();
    for tool in tools {
        catalog = catalog.with_tool(tool).unwrap();
    }
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let orch = Orchestrator::builder(store.clone(), reasoner, catalog)
        .max_parallel(max_parallel)
        .build();
    Harness { orch, workspace, store }
}

fn reason_of(outcome: &SessionOutcome) -> Option<ErrorClass> {
    match outcome {
        SessionOutcome::Failed { reason, .. } => Some(*reason),
        SessionOutcome::Done { .. } => None,
    }
}

#[tokio::test]
async fn test_partial_aggregate_keeps_every_result() {
    let reasoner = Arc::new(FnReasoner::new(|s: &SessionState| {
        if s.goal == "c" {
            Err(ReasonerError::Fatal("cannot plan c".into()))
        } else {
            Ok(Action::Finish { summary: format!("did {}", s.goal) })
        }
    }));
    let h = harness(reasoner, vec![], &["echo"], 3);
    let job_id = h.orch.submit_goal("a; b; c").await.unwrap();
    let job = h.orch.wait_job(&job_id).await.unwrap();

    assert_eq!(job.aggregate_status, AggregateStatus::Partial);
    assert_eq!(job.results.len(), 3);
    assert!(job.finished_at.is_some());
    let failed = job.failed_sub_goals();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].1, "c");
    assert_eq!(reason_of(&job.results[failed[0].0]), Some(ErrorClass::Reasoner));
}

#[tokio::test]
async fn test_all_failed_is_failure() {
    let reasoner = Arc::new(FnReasoner::new(|_: &SessionState| {
        Err(ReasonerError::Fatal("no".into()))
    }));
    let h = harness(reasoner, vec![], &["echo"], 2);
    let job_id = h.orch.submit_goal("x\ny").await.unwrap();
    let job = h.orch.wait_job(&job_id).await.unwrap();
    assert_eq!(job.aggregate_status, AggregateStatus::Failure);
}

#[tokio::test]
async fn test_parallelism_is_bounded() {
    let gauge = Arc::new(GaugeTool::default());
    let tool: Arc<dyn Tool> = gauge.clone();
    let reasoner = Arc::new(FnReasoner::new(invoke_then_finish("gauge")));
    let h = harness(reasoner, vec![tool], &["echo"], 2);
    let job_id = h.orch.submit_goal("1; 2; 3; 4; 5").await.unwrap();
    let job = h.orch.wait_job(&job_id).await.unwrap();

    assert_eq!(job.aggregate_status, AggregateStatus::Success);
    assert_eq!(job.results.len(), 5);
    let peak = gauge.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak concurrency {peak}");
    assert!(peak >= 1);
    assert_eq!(h.orch.running_sessions(), 0);
    assert_eq!(h.orch.analytics().snapshot().tool_count("gauge", "success"), 5);
}

#[tokio::test]
async fn test_queued_sessions_start_in_submission_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();
    let reasoner = Arc::new(FnReasoner::new(move |s: &SessionState| {
        if s.iteration_count == 0 {
            seen.lock().unwrap().push(s.goal.clone());
        }
        Ok(Action::Finish { summary: "ok".into() })
    }));
    let h = harness(reasoner, vec![], &["echo"], 1);
    let job_id = h.orch.submit_goal("one\ntwo\nthree\nfour").await.unwrap();
    h.orch.wait_job(&job_id).await.unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["one", "two", "three", "four"]);
}

#[tokio::test]
async fn test_cancel_session_mid_tool() {
    let started = Arc::new(Notify::new());
    let tool: Arc<dyn Tool> = Arc::new(BlockingTool { started: started.clone() });
    let reasoner = Arc::new(FnReasoner::new(invoke_then_finish("block")));
    let h = harness(reasoner, vec![tool], &["echo"], 2);
    let job_id = h.orch.submit_goal("wait forever").await.unwrap();

    started.notified().await;
    let session_id = h.orch.job(&job_id).await.unwrap().subtasks[0].clone();
    assert!(h.orch.cancel_session(&session_id).await);

    let job = tokio::time::timeout(Duration::from_secs(5), h.orch.wait_job(&job_id))
        .await
        .expect("cancelled session finishes")
        .unwrap();
    assert_eq!(job.aggregate_status, AggregateStatus::Failure);
    assert_eq!(reason_of(&job.results[&session_id]), Some(ErrorClass::Cancelled));

    let stored = h.orch.load_session(&session_id).await.unwrap();
    assert_eq!(stored.outcome.map(|o| o.class_key()), Some("cancelled"));
    assert_eq!(stored.iteration_count, 0);
    assert!(!h.orch.cancel_session(&session_id).await);
}

#[tokio::test]
async fn test_cancel_job_reaches_queued_sessions() {
    let started = Arc::new(Notify::new());
    let tool: Arc<dyn Tool> = Arc::new(BlockingTool { started: started.clone() });
    let reasoner = Arc::new(FnReasoner::new(invoke_then_finish("block")));
    let h = harness(reasoner, vec![tool], &["echo"], 1);
    let job_id = h.orch.submit_goal("first; second").await.unwrap();

    started.notified().await;
    assert_eq!(h.orch.cancel_job(&job_id).await, 2);
    let job = tokio::time::timeout(Duration::from_secs(5), h.orch.wait_job(&job_id))
        .await
        .expect("job finishes")
        .unwrap();

    assert_eq!(job.aggregate_status, AggregateStatus::Failure);
    for id in &job.subtasks {
        assert_eq!(reason_of(&job.results[id]), Some(ErrorClass::Cancelled));
        let stored = h.store.load(id).await.unwrap();
        assert!(stored.is_terminal());
    }
}

#[tokio::test]
async fn test_retry_failed_dispatches_fresh_sessions() {
    let failures_left = Arc::new(AtomicU32::new(1));
    let left = failures_left.clone();
    let reasoner = Arc::new(FnReasoner::new(move |s: &SessionState| {
        if s.goal == "b"
            && left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(ReasonerError::Fatal("flaky planner".into()));
        }
        Ok(Action::Finish { summary: "ok".into() })
    }));
    let h = harness(reasoner, vec![], &["echo"], 2);
    let first_id = h.orch.submit_goal("a; b").await.unwrap();
    let first = h.orch.wait_job(&first_id).await.unwrap();
    assert_eq!(first.aggregate_status, AggregateStatus::Partial);
    let (failed_session, _) = first.failed_sub_goals()[0];
    let failed_session = failed_session.clone();

    let retry_id = h.orch.retry_failed(&first_id).await.unwrap();
    let retry = h.orch.wait_job(&retry_id).await.unwrap();
    assert_eq!(retry.aggregate_status, AggregateStatus::Success);
    assert_eq!(retry.retry_of.as_deref(), Some(first_id.as_str()));
    assert_eq!(retry.subtasks.len(), 1);
    assert_ne!(retry.subtasks[0], failed_session);

    // 原任务与原会话快照保持失败记录
    let original = h.orch.job(&first_id).await.unwrap();
    assert_eq!(original.aggregate_status, AggregateStatus::Partial);
    let stored = h.orch.load_session(&failed_session).await.unwrap();
    assert!(!stored.outcome.unwrap().is_done());

    assert!(h.orch.retry_failed(&retry_id).await.is_err());
}

#[tokio::test]
async fn test_panicking_session_is_isolated() {
    let reasoner = Arc::new(FnReasoner::new(|s: &SessionState| {
        if s.goal == "boom" {
            panic!("reasoner exploded");
        }
        Ok(Action::Finish { summary: "ok".into() })
    }));
    let h = harness(reasoner, vec![], &["echo"], 2);
    let job_id = h.orch.submit_goal("fine; boom").await.unwrap();
    let job = h.orch.wait_job(&job_id).await.unwrap();

    assert_eq!(job.aggregate_status, AggregateStatus::Partial);
    let (panicked, _) = job.failed_sub_goals()[0];
    assert_eq!(reason_of(&job.results[panicked]), Some(ErrorClass::Internal));
    let stored = h.orch.load_session(panicked).await.unwrap();
    assert!(stored.is_terminal());
}

#[tokio::test]
async fn test_sessions_get_separate_sandboxes() {
    let reasoner = Arc::new(FnReasoner::new(|s: &SessionState| {
        if s.iteration_count == 0 {
            Ok(Action::InvokeTool {
                tool: "write_file".into(),
                args: json!({"path": "out.txt", "content": s.goal}),
                task_id: None,
            })
        } else {
            Ok(Action::Finish { summary: "written".into() })
        }
    }));
    let h = harness(reasoner, vec![], &["write_file"], 2);
    let job_id = h.orch.submit_goal("left; right").await.unwrap();
    let job = h.orch.wait_job(&job_id).await.unwrap();
    assert_eq!(job.aggregate_status, AggregateStatus::Success);

    for id in &job.subtasks {
        let written = std::fs::read_to_string(h.workspace.path().join(id).join("out.txt")).unwrap();
        assert_eq!(&written, &job.sub_goals[id]);
    }
    assert!(!h.workspace.path().join("out.txt").exists());
}

#[tokio::test]
async fn test_list_sessions_pages_through_job() {
    let reasoner = Arc::new(FnReasoner::new(|_: &SessionState| {
        Ok(Action::Finish { summary: "ok".into() })
    }));
    let h = harness(reasoner, vec![], &["echo"], 3);
    let job_id = h.orch.submit_goal("1;2;3;4;5").await.unwrap();
    h.orch.wait_job(&job_id).await.unwrap();
    let job = h.orch.take_job(&job_id).await.unwrap();
    assert!(h.orch.job(&job_id).await.is_none());

    let mut listed = Vec::new();
    let mut cursor = None;
    loop {
        let page = h.orch.list_sessions(cursor.as_deref(), 2).await.unwrap();
        listed.extend(page.sessions.into_iter().map(|s| s.session_id));
        cursor = page.next_cursor;
        if cursor.is_none() {
            break;
        }
    }
    let mut expected = job.subtasks.clone();
    expected.sort();
    assert_eq!(listed, expected);
}
