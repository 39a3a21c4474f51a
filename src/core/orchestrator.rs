//! 编排器：把顶层目标拆成子目标，每个子目标一个会话，有界并发运行并汇总结果
//!
//! 提交的会话进入 FIFO 队列，后台分发任务按提交顺序取许可再 spawn 推理循环；
//! 会话任务 panic 时由 JoinHandle 捕获，记为 Failed(internal)，不影响其他会话。
//! 任务汇总通过 watch 通道发布，wait_job 等到全部子会话进入终态。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::analytics::AnalyticsCollector;
use crate::config::AppConfig;
use crate::core::{
    AgentError, BackoffPolicy, ErrorClass, GoalDecomposer, LineDecomposer, RecoveryEngine,
    SessionPermit, SessionScheduler, SessionSupervisor,
};
use crate::react::{Checkpointer, LoopConfig, LoopEvent, ReasoningLoop};
use crate::reasoner::{create_reasoner, Reasoner};
use crate::session::{SessionId, SessionOutcome, SessionState};
use crate::store::{create_task_store, SessionPage, StoreError, TaskStore};
use crate::tools::{ToolCatalog, ToolExecutor};

pub type JobId = String;

/// 任务汇总状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    Running,
    /// 全部 Done
    Success,
    /// 至少一个 Done 且至少一个 Failed
    Partial,
    /// 全部 Failed
    Failure,
}

impl AggregateStatus {
    pub fn is_terminal(self) -> bool {
        self != AggregateStatus::Running
    }
}

/// 一次目标分发；results 只追加，不覆盖已有终态
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationJob {
    pub job_id: JobId,
    pub goal: String,
    /// 子会话，按提交顺序
    pub subtasks: Vec<SessionId>,
    pub sub_goals: BTreeMap<SessionId, String>,
    pub aggregate_status: AggregateStatus,
    pub results: BTreeMap<SessionId, SessionOutcome>,
    /// retry_failed 产生的任务指向原任务
    pub retry_of: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl OrchestrationJob {
    fn new(goal: String, sub_goals: Vec<(SessionId, String)>, retry_of: Option<JobId>) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            goal,
            subtasks: sub_goals.iter().map(|(id, _)| id.clone()).collect(),
            sub_goals: sub_goals.into_iter().collect(),
            aggregate_status: AggregateStatus::Running,
            results: BTreeMap::new(),
            retry_of,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// 按已收集的结果计算汇总状态
    pub fn aggregate(&self) -> AggregateStatus {
        if self.results.len() < self.subtasks.len() {
            return AggregateStatus::Running;
        }
        let done = self.results.values().filter(|o| o.is_done()).count();
        match done {
            0 => AggregateStatus::Failure,
            n if n == self.results.len() => AggregateStatus::Success,
            _ => AggregateStatus::Partial,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.aggregate_status.is_terminal()
    }

    /// 以 Failed 结束的子会话及其子目标
    pub fn failed_sub_goals(&self) -> Vec<(&SessionId, &str)> {
        self.subtasks
            .iter()
            .filter(|id| matches!(self.results.get(*id), Some(SessionOutcome::Failed { .. })))
            .filter_map(|id| self.sub_goals.get(id).map(|g| (id, g.as_str())))
            .collect()
    }

    fn record(&mut self, session_id: SessionId, outcome: SessionOutcome) {
        if self.results.contains_key(&session_id) || !self.sub_goals.contains_key(&session_id) {
            return;
        }
        self.results.insert(session_id, outcome);
        self.aggregate_status = self.aggregate();
        if self.aggregate_status.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }
}

/// 排队中的会话
struct SessionRequest {
    job_id: JobId,
    session_id: SessionId,
    sub_goal: String,
    cancel: CancellationToken,
}

struct Inner {
    store: Arc<dyn TaskStore>,
    reasoner: Arc<dyn Reasoner>,
    catalog: ToolCatalog,
    decomposer: Arc<dyn GoalDecomposer>,
    analytics: Arc<AnalyticsCollector>,
    supervisor: SessionSupervisor,
    scheduler: SessionScheduler,
    loop_config: LoopConfig,
    recovery: RecoveryEngine,
    tool_timeout: Duration,
    max_output_bytes: usize,
    event_tx: Option<mpsc::UnboundedSender<LoopEvent>>,
    jobs: RwLock<HashMap<JobId, watch::Sender<OrchestrationJob>>>,
    queue_tx: mpsc::UnboundedSender<SessionRequest>,
    shutdown: CancellationToken,
}

/// 编排器句柄；Clone 共享同一组会话与任务
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

pub struct OrchestratorBuilder {
    store: Arc<dyn TaskStore>,
    reasoner: Arc<dyn Reasoner>,
    catalog: ToolCatalog,
    decomposer: Arc<dyn GoalDecomposer>,
    analytics: Option<Arc<AnalyticsCollector>>,
    max_parallel: usize,
    loop_config: LoopConfig,
    recovery: RecoveryEngine,
    event_tx: Option<mpsc::UnboundedSender<LoopEvent>>,
}

impl OrchestratorBuilder {
    pub fn max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n;
        self
    }

    pub fn loop_config(mut self, cfg: LoopConfig) -> Self {
        self.loop_config = cfg;
        self
    }

    pub fn decomposer(mut self, decomposer: Arc<dyn GoalDecomposer>) -> Self {
        self.decomposer = decomposer;
        self
    }

    pub fn analytics(mut self, analytics: Arc<AnalyticsCollector>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    /// 检查点写入的退避策略
    pub fn checkpoint_retry(mut self, policy: BackoffPolicy) -> Self {
        self.recovery = RecoveryEngine::new(policy);
        self
    }

    pub fn event_tx(mut self, tx: mpsc::UnboundedSender<LoopEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 启动分发任务；需在 tokio 运行时内调用
    pub fn build(self) -> Orchestrator {
        let tools = self.catalog.tools_section();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            tool_timeout: tools.tool_timeout(),
            max_output_bytes: tools.max_output_bytes,
            store: self.store,
            reasoner: self.reasoner,
            catalog: self.catalog,
            decomposer: self.decomposer,
            analytics: self
                .analytics
                .unwrap_or_else(|| Arc::new(AnalyticsCollector::default())),
            supervisor: SessionSupervisor::new(),
            scheduler: SessionScheduler::new(self.max_parallel),
            loop_config: self.loop_config,
            recovery: self.recovery,
            event_tx: self.event_tx,
            jobs: RwLock::new(HashMap::new()),
            queue_tx,
            shutdown: CancellationToken::new(),
        });
        tracing::info!(
            store = inner.store.backend_name(),
            max_parallel = inner.scheduler.max_parallel(),
            "orchestrator started"
        );
        tokio::spawn(dispatch(Arc::downgrade(&inner), queue_rx));
        Orchestrator { inner }
    }
}

/// 按提交顺序取许可并启动会话；编排器释放后退出
async fn dispatch(weak: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<SessionRequest>) {
    while let Some(req) = rx.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let permit = if req.cancel.is_cancelled() {
            None
        } else {
            tokio::select! {
                biased;
                _ = req.cancel.cancelled() => None,
                p = inner.scheduler.acquire() => p.ok(),
            }
        };
        match permit {
            Some(permit) => {
                tokio::spawn(run_session(inner, req, permit));
            }
            None => {
                let outcome = SessionOutcome::failed(ErrorClass::Cancelled, "session cancelled before start");
                inner.abandon(&req, outcome).await;
            }
        }
    }
    tracing::debug!("orchestrator dispatcher stopped");
}

/// 会话执行单元：内层 spawn 隔离 panic，许可在结果收集后归还
async fn run_session(inner: Arc<Inner>, req: SessionRequest, permit: SessionPermit) {
    let worker = {
        let inner = inner.clone();
        let session_id = req.session_id.clone();
        let sub_goal = req.sub_goal.clone();
        let cancel = req.cancel.clone();
        tokio::spawn(async move { inner.execute(session_id, sub_goal, cancel).await })
    };

    match worker.await {
        Ok(outcome) => {
            drop(permit);
            inner.supervisor.release(&req.session_id).await;
            inner.complete(&req.job_id, &req.session_id, outcome).await;
        }
        Err(e) => {
            drop(permit);
            let message = if e.is_panic() {
                "session task panicked"
            } else {
                "session task aborted"
            };
            tracing::error!(session_id = %req.session_id, "{}", message);
            let outcome = SessionOutcome::failed(ErrorClass::Internal, message);
            inner.abandon(&req, outcome).await;
        }
    }
}

impl Inner {
    async fn execute(&self, session_id: SessionId, sub_goal: String, cancel: CancellationToken) -> SessionOutcome {
        let registry = match self.catalog.build_for_session(&session_id).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(session_id = %session_id, "cannot prepare tools: {}", e);
                let state = SessionState::new(session_id, sub_goal);
                let outcome = SessionOutcome::failed(e.class(), e.to_string());
                return self.persist_outcome(state, outcome).await;
            }
        };
        let executor = ToolExecutor::new(Arc::new(registry), self.tool_timeout)
            .with_max_output_bytes(self.max_output_bytes)
            .with_analytics(self.analytics.clone())
            .with_session(session_id.clone());
        let checkpointer = Checkpointer::new(self.store.clone(), self.recovery.clone());
        let mut reasoning = ReasoningLoop::new(
            self.reasoner.clone(),
            executor,
            checkpointer,
            self.loop_config.clone(),
        )
        .with_cancel_token(cancel)
        .with_analytics(self.analytics.clone());
        if let Some(tx) = &self.event_tx {
            reasoning = reasoning.with_event_tx(tx.clone());
        }
        reasoning.run(SessionState::new(session_id, sub_goal)).await.outcome
    }

    /// 未经推理循环结束的会话：在最后提交的快照（或空快照）上写入终态并上报
    async fn abandon(&self, req: &SessionRequest, outcome: SessionOutcome) {
        self.supervisor.release(&req.session_id).await;
        let state = match self.store.load(&req.session_id).await {
            Ok(state) if !state.is_terminal() => state,
            Ok(state) => {
                let outcome = state.outcome.clone().unwrap_or(outcome);
                self.complete(&req.job_id, &req.session_id, outcome).await;
                return;
            }
            Err(_) => SessionState::new(req.session_id.clone(), req.sub_goal.clone()),
        };
        let outcome = self.persist_outcome(state, outcome).await;
        self.complete(&req.job_id, &req.session_id, outcome).await;
    }

    async fn persist_outcome(&self, mut state: SessionState, outcome: SessionOutcome) -> SessionOutcome {
        state.outcome = Some(outcome.clone());
        state.touch();
        if let Err(e) = self.store.save(&state).await {
            tracing::warn!(session_id = %state.session_id, "cannot persist terminal state: {}", e);
        }
        self.analytics.record_session(&state.session_id, &outcome);
        outcome
    }

    /// 收集会话终态到所属任务
    async fn complete(&self, job_id: &str, session_id: &str, outcome: SessionOutcome) {
        let jobs = self.jobs.read().await;
        let Some(tx) = jobs.get(job_id) else {
            tracing::warn!(job_id = %job_id, session_id = %session_id, "result for unknown job dropped");
            return;
        };
        tx.send_modify(|job| job.record(session_id.to_string(), outcome));
        let (status, sessions) = {
            let job = tx.borrow();
            (job.aggregate_status, job.subtasks.len())
        };
        if status.is_terminal() {
            tracing::info!(job_id = %job_id, status = ?status, sessions, "job finished");
        }
    }
}

impl Orchestrator {
    pub fn builder(
        store: Arc<dyn TaskStore>,
        reasoner: Arc<dyn Reasoner>,
        catalog: ToolCatalog,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            store,
            reasoner,
            catalog,
            decomposer: Arc::new(LineDecomposer),
            analytics: None,
            max_parallel: SessionScheduler::default().max_parallel(),
            loop_config: LoopConfig::default(),
            recovery: RecoveryEngine::new(BackoffPolicy::checkpoint_default()),
            event_tx: None,
        }
    }

    /// 按配置组装：存储、工具目录、reasoner、分析
    pub async fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        let catalog = ToolCatalog::from_config(&cfg.tools, cfg.app.workspace_root())?;
        let reasoner = create_reasoner(&cfg.reasoner, catalog.schema_json()?)?;
        let store = create_task_store(&cfg.store).await;
        Ok(Self::builder(store, reasoner, catalog)
            .max_parallel(cfg.orchestrator.max_parallel_sessions)
            .loop_config(LoopConfig::from_agent(&cfg.agent))
            .checkpoint_retry(cfg.store.checkpoint_retry.clone())
            .analytics(Arc::new(AnalyticsCollector::from_config(&cfg.analytics)))
            .build())
    }

    /// 拆分目标并排队全部子会话，立即返回任务 id
    pub async fn submit_goal(&self, goal: &str) -> Result<JobId, AgentError> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(AgentError::InvalidAction("goal is empty".into()));
        }
        let mut sub_goals = self.inner.decomposer.decompose(goal).await?;
        sub_goals.retain(|g| !g.trim().is_empty());
        if sub_goals.is_empty() {
            sub_goals.push(goal.to_string());
        }
        self.dispatch(goal.to_string(), sub_goals, None).await
    }

    async fn dispatch(
        &self,
        goal: String,
        sub_goals: Vec<String>,
        retry_of: Option<JobId>,
    ) -> Result<JobId, AgentError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let sub_goals: Vec<(SessionId, String)> = sub_goals
            .into_iter()
            .map(|g| (Uuid::new_v4().to_string(), g))
            .collect();
        let job = OrchestrationJob::new(goal, sub_goals.clone(), retry_of);
        let job_id = job.job_id.clone();
        tracing::info!(job_id = %job_id, sessions = sub_goals.len(), "job submitted");

        let (tx, _rx) = watch::channel(job);
        self.inner.jobs.write().await.insert(job_id.clone(), tx);

        for (session_id, sub_goal) in sub_goals {
            let cancel = self.inner.supervisor.register(&session_id).await;
            let req = SessionRequest {
                job_id: job_id.clone(),
                session_id,
                sub_goal,
                cancel,
            };
            if let Err(mpsc::error::SendError(req)) = self.inner.queue_tx.send(req) {
                let outcome = SessionOutcome::failed(ErrorClass::Cancelled, "orchestrator stopped");
                self.inner.abandon(&req, outcome).await;
            }
        }
        Ok(job_id)
    }

    pub async fn job(&self, job_id: &str) -> Option<OrchestrationJob> {
        self.inner
            .jobs
            .read()
            .await
            .get(job_id)
            .map(|tx| tx.borrow().clone())
    }

    /// 等待任务全部子会话进入终态
    pub async fn wait_job(&self, job_id: &str) -> Result<OrchestrationJob, AgentError> {
        let mut rx = self
            .inner
            .jobs
            .read()
            .await
            .get(job_id)
            .map(|tx| tx.subscribe())
            .ok_or_else(|| AgentError::InvalidAction(format!("unknown job {job_id}")))?;
        let job = rx
            .wait_for(OrchestrationJob::is_terminal)
            .await
            .map_err(|_| AgentError::Internal(format!("job {job_id} dropped")))?;
        Ok((*job).clone())
    }

    /// 取走已结束的任务（归档由调用方负责）；未结束时保留并返回 None
    pub async fn take_job(&self, job_id: &str) -> Option<OrchestrationJob> {
        let mut jobs = self.inner.jobs.write().await;
        if !jobs.get(job_id)?.borrow().is_terminal() {
            return None;
        }
        jobs.remove(job_id).map(|tx| tx.borrow().clone())
    }

    /// 取消单个会话（排队中或运行中）；未知或已结束返回 false
    pub async fn cancel_session(&self, session_id: &str) -> bool {
        let cancelled = self.inner.supervisor.cancel(session_id).await;
        if cancelled {
            tracing::info!(session_id = %session_id, "session cancellation requested");
        }
        cancelled
    }

    /// 取消任务下所有未结束的会话，返回发出取消的数量
    pub async fn cancel_job(&self, job_id: &str) -> usize {
        let Some(job) = self.job(job_id).await else {
            return 0;
        };
        let mut n = 0;
        for id in job.subtasks.iter().filter(|id| !job.results.contains_key(*id)) {
            if self.cancel_session(id).await {
                n += 1;
            }
        }
        n
    }

    /// 以新会话重新分发已结束任务中失败的子目标；原任务与快照保持不变
    pub async fn retry_failed(&self, job_id: &str) -> Result<JobId, AgentError> {
        let job = self
            .job(job_id)
            .await
            .ok_or_else(|| AgentError::InvalidAction(format!("unknown job {job_id}")))?;
        if !job.is_terminal() {
            return Err(AgentError::InvalidAction(format!("job {job_id} is still running")));
        }
        let failed: Vec<String> = job
            .failed_sub_goals()
            .into_iter()
            .map(|(_, g)| g.to_string())
            .collect();
        if failed.is_empty() {
            return Err(AgentError::InvalidAction(format!("job {job_id} has no failed sessions")));
        }
        self.dispatch(job.goal.clone(), failed, Some(job.job_id.clone())).await
    }

    pub async fn list_sessions(&self, cursor: Option<&str>, page_size: usize) -> Result<SessionPage, StoreError> {
        self.inner.store.list_sessions(cursor, page_size).await
    }

    pub async fn load_session(&self, session_id: &str) -> Result<SessionState, StoreError> {
        self.inner.store.load(session_id).await
    }

    pub fn analytics(&self) -> &Arc<AnalyticsCollector> {
        &self.inner.analytics
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.inner.store
    }

    /// 当前持有运行许可的会话数
    pub fn running_sessions(&self) -> usize {
        self.inner.scheduler.running()
    }

    /// 拒绝新提交、关闭调度器并取消全部会话；已提交任务仍会收集到终态
    pub fn shutdown(&self) {
        tracing::info!("orchestrator shutting down");
        self.inner.shutdown.cancel();
        self.inner.scheduler.close();
        self.inner.supervisor.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolsSection;
    use crate::reasoner::{Action, FnReasoner, ReasonerError};
    use crate::store::MemoryTaskStore;

    fn job_with(outcomes: &[bool]) -> OrchestrationJob {
        let subs: Vec<(SessionId, String)> = (0..outcomes.len())
            .map(|i| (format!("s{i}"), format!("goal {i}")))
            .collect();
        let mut job = OrchestrationJob::new("g".into(), subs, None);
        for (i, ok) in outcomes.iter().enumerate() {
            let outcome = if *ok {
                SessionOutcome::Done { summary: "ok".into() }
            } else {
                SessionOutcome::failed(ErrorClass::ToolFailed, "boom")
            };
            job.record(format!("s{i}"), outcome);
        }
        job
    }

    #[test]
    fn test_aggregate_rules() {
        assert_eq!(job_with(&[true, true]).aggregate_status, AggregateStatus::Success);
        assert_eq!(job_with(&[true, false, true]).aggregate_status, AggregateStatus::Partial);
        assert_eq!(job_with(&[false, false]).aggregate_status, AggregateStatus::Failure);
    }

    #[test]
    fn test_results_are_not_overwritten() {
        let mut job = job_with(&[false]);
        job.record("s0".into(), SessionOutcome::Done { summary: "late".into() });
        assert!(!job.results["s0"].is_done());
        assert_eq!(job.failed_sub_goals(), vec![(&"s0".to_string(), "goal 0")]);
    }

    #[test]
    fn test_running_until_all_collected() {
        let subs = vec![("a".to_string(), "x".to_string()), ("b".to_string(), "y".to_string())];
        let mut job = OrchestrationJob::new("g".into(), subs, None);
        job.record("a".into(), SessionOutcome::Done { summary: "ok".into() });
        assert_eq!(job.aggregate_status, AggregateStatus::Running);
        assert!(job.finished_at.is_none());
    }

    fn orchestrator(reasoner: Arc<dyn Reasoner>) -> (Orchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let tools = ToolsSection {
            enabled: vec!["echo".into()],
            ..ToolsSection::default()
        };
        let catalog = ToolCatalog::from_config(&tools, dir.path()).unwrap();
        let orch = Orchestrator::builder(Arc::new(MemoryTaskStore::new()), reasoner, catalog)
            .max_parallel(2)
            .build();
        (orch, dir)
    }

    #[tokio::test]
    async fn test_submit_and_wait() {
        let reasoner = Arc::new(FnReasoner::new(|s: &SessionState| {
            Ok(Action::Finish {
                summary: format!("did {}", s.goal),
            })
        }));
        let (orch, _dir) = orchestrator(reasoner);
        let job_id = orch.submit_goal("a; b").await.unwrap();
        let job = orch.wait_job(&job_id).await.unwrap();
        assert_eq!(job.aggregate_status, AggregateStatus::Success);
        assert_eq!(job.results.len(), 2);
        for id in &job.subtasks {
            let state = orch.load_session(id).await.unwrap();
            assert!(state.outcome.unwrap().is_done());
        }
        assert!(orch.take_job(&job_id).await.is_some());
        assert!(orch.job(&job_id).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_goal_rejected() {
        let (orch, _dir) = orchestrator(Arc::new(FnReasoner::new(|_: &SessionState| {
            Err(ReasonerError::Fatal("unused".into()))
        })));
        assert!(orch.submit_goal("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_goals() {
        let (orch, _dir) = orchestrator(Arc::new(FnReasoner::new(|_: &SessionState| {
            Ok(Action::Finish { summary: "ok".into() })
        })));
        orch.shutdown();
        assert!(matches!(orch.submit_goal("x").await, Err(AgentError::Cancelled)));
    }

    #[tokio::test]
    async fn test_builder_uses_checkpoint_backoff() {
        let (orch, _dir) = orchestrator(Arc::new(FnReasoner::new(|_: &SessionState| {
            Ok(Action::Finish { summary: "ok".into() })
        })));
        assert_eq!(*orch.inner.recovery.store_backoff(), BackoffPolicy::checkpoint_default());
    }

    struct StallingReasoner;

    #[async_trait::async_trait]
    impl Reasoner for StallingReasoner {
        async fn propose_action(&self, _state: &SessionState) -> Result<Action, ReasonerError> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(Action::Finish { summary: "late".into() })
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_running_and_queued_sessions() {
        let (orch, _dir) = orchestrator(Arc::new(StallingReasoner));
        let job_id = orch.submit_goal("a; b; c").await.unwrap();
        while orch.running_sessions() < 2 {
            tokio::task::yield_now().await;
        }

        orch.shutdown();
        let job = tokio::time::timeout(std::time::Duration::from_secs(5), orch.wait_job(&job_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.aggregate_status, AggregateStatus::Failure);
        assert!(job.results.values().all(|o| o.class_key() == ErrorClass::Cancelled.as_str()));
        assert_eq!(orch.running_sessions(), 0);
        assert!(matches!(orch.inner.scheduler.acquire().await, Err(AgentError::Cancelled)));
    }
}
