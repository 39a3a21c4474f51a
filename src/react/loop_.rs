//! 推理循环
//!
//! Idle → Thinking（向 reasoner 要下一步）→ Acting（改任务表 / 调工具 / 宣告完成）→ Checkpointing → Thinking …
//! Finish → Done；迭代或墙钟预算耗尽 → Failed("budget exceeded")；不可恢复错误 → Failed(错误类别)。
//! 工具失败记录到对应任务并作为观察交还 reasoner，不会让循环失败。
//! 取消在下一个挂起点（reasoner、工具、存储）生效，持久化最后一次完整提交的快照。

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::analytics::AnalyticsCollector;
use crate::config::AgentSection;
use crate::core::{AgentError, ErrorClass};
use crate::react::{Checkpointer, LoopEvent, LoopPhase};
use crate::reasoner::{Action, Reasoner, ReasonerError};
use crate::session::{SessionOutcome, SessionState, TaskStatus};
use crate::tools::ToolExecutor;

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 迭代 / 时间预算
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    pub max_iterations: u64,
    pub max_wall_clock: Duration,
    pub reasoner_timeout: Duration,
}

impl LoopConfig {
    pub fn from_agent(cfg: &AgentSection) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            max_wall_clock: Duration::from_secs(cfg.max_wall_clock_secs),
            reasoner_timeout: Duration::from_secs(cfg.reasoner_timeout_secs),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from_agent(&AgentSection::default())
    }
}

/// 循环结束报告：终态与最终快照
#[derive(Debug, Clone)]
pub struct LoopReport {
    pub outcome: SessionOutcome,
    pub state: SessionState,
}

/// 到期时触发预算令牌；循环结束时随 Drop 中止
struct DeadlineGuard(tokio::task::JoinHandle<()>);

impl DeadlineGuard {
    fn arm(deadline: Instant, token: CancellationToken) -> Self {
        Self(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            token.cancel();
        }))
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum Step {
    Continue,
    Finished(String),
    Interrupted,
}

fn preview(s: &str) -> String {
    if s.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!("{}...", s.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>())
    } else {
        s.to_string()
    }
}

fn error_observation(action: &str, err: &AgentError) -> Value {
    json!({
        "action": action,
        "error": err.to_string(),
        "class": err.class(),
    })
}

/// 单个会话的推理循环；每个会话独占一个实例
pub struct ReasoningLoop {
    reasoner: Arc<dyn Reasoner>,
    executor: ToolExecutor,
    checkpointer: Checkpointer,
    config: LoopConfig,
    analytics: Option<Arc<AnalyticsCollector>>,
    cancel: CancellationToken,
    event_tx: Option<UnboundedSender<LoopEvent>>,
    phase: LoopPhase,
}

impl ReasoningLoop {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        executor: ToolExecutor,
        checkpointer: Checkpointer,
        config: LoopConfig,
    ) -> Self {
        Self {
            reasoner,
            executor,
            checkpointer,
            config,
            analytics: None,
            cancel: CancellationToken::new(),
            event_tx: None,
            phase: LoopPhase::Idle,
        }
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<LoopEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_analytics(mut self, analytics: Arc<AnalyticsCollector>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn send_event(&self, ev: LoopEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    fn set_phase(&mut self, phase: LoopPhase, state: &SessionState) {
        self.phase = phase;
        tracing::debug!(session_id = %state.session_id, ?phase, iteration = state.iteration_count, "phase");
        self.send_event(LoopEvent::Phase {
            session_id: state.session_id.clone(),
            phase,
            iteration: state.iteration_count,
        });
    }

    /// 运行到终态；已是终态的快照直接返回
    pub async fn run(&mut self, mut state: SessionState) -> LoopReport {
        if let Some(outcome) = state.outcome.clone() {
            self.phase = if outcome.is_done() {
                LoopPhase::Done
            } else {
                LoopPhase::Failed
            };
            return LoopReport { outcome, state };
        }

        let budget = self.cancel.child_token();
        let _deadline = DeadlineGuard::arm(Instant::now() + self.config.max_wall_clock, budget.clone());
        tracing::info!(session_id = %state.session_id, goal = %state.goal, "session started");
        self.set_phase(LoopPhase::Idle, &state);

        if let Err(e) = self.checkpoint(&mut state, &budget).await {
            return match e {
                AgentError::Cancelled => self.interrupted(state).await,
                e => self.fail(state, e).await,
            };
        }
        let mut committed = state.clone();

        loop {
            if state.iteration_count >= self.config.max_iterations {
                let err = AgentError::BudgetExceeded(format!(
                    "iteration ceiling of {} reached",
                    self.config.max_iterations
                ));
                return self.fail(state, err).await;
            }

            self.set_phase(LoopPhase::Thinking, &state);
            let proposal = tokio::select! {
                biased;
                _ = budget.cancelled() => None,
                r = tokio::time::timeout(self.config.reasoner_timeout, self.reasoner.propose_action(&state)) => Some(r),
            };
            let Some(proposal) = proposal else {
                return self.interrupted(committed).await;
            };

            self.set_phase(LoopPhase::Acting, &state);
            state.iteration_count += 1;
            let step = match proposal {
                Ok(Ok(action)) => self.apply(&mut state, action, &budget).await,
                Ok(Err(ReasonerError::Malformed(msg))) => {
                    tracing::warn!(session_id = %state.session_id, "malformed reasoner output: {}", msg);
                    state.set_observation(json!({ "error": format!("malformed action: {msg}") }));
                    Step::Continue
                }
                Ok(Err(e)) => return self.fail(state, e.into()).await,
                Err(_) => {
                    let err = AgentError::Timeout(format!(
                        "reasoner exceeded {}ms",
                        self.config.reasoner_timeout.as_millis()
                    ));
                    tracing::warn!(session_id = %state.session_id, "{}", err);
                    state.set_observation(error_observation("think", &err));
                    Step::Continue
                }
            };

            match step {
                Step::Continue => {}
                Step::Finished(summary) => {
                    return self.finish(state, SessionOutcome::Done { summary }).await;
                }
                Step::Interrupted => return self.interrupted(committed).await,
            }

            self.set_phase(LoopPhase::Checkpointing, &state);
            match self.checkpoint(&mut state, &budget).await {
                Ok(()) => committed = state.clone(),
                Err(AgentError::Cancelled) => return self.interrupted(committed).await,
                Err(e) => return self.fail(state, e).await,
            }
        }
    }

    async fn checkpoint(&self, state: &mut SessionState, budget: &CancellationToken) -> Result<(), AgentError> {
        state.touch();
        let session_id = state.session_id.clone();
        let tx = self.event_tx.clone();
        self.checkpointer
            .commit(state, Some(budget), |attempt, err| {
                if let Some(tx) = &tx {
                    let _ = tx.send(LoopEvent::Recovery {
                        session_id: session_id.clone(),
                        attempt,
                        detail: err.to_string(),
                    });
                }
            })
            .await
    }

    async fn apply(&self, state: &mut SessionState, action: Action, budget: &CancellationToken) -> Step {
        self.send_event(LoopEvent::Action {
            session_id: state.session_id.clone(),
            kind: action.kind().to_string(),
        });

        match action {
            Action::Finish { summary } => return Step::Finished(summary),

            Action::AddTask {
                description,
                depends_on,
            } => {
                let obs = match state.todo_list.add(description, depends_on) {
                    Ok(id) => json!({ "action": "add_task", "task_id": id }),
                    Err(e) => error_observation("add_task", &e.into()),
                };
                state.set_observation(obs);
            }

            Action::CompleteTask { task_id, result } => {
                let todo = &mut state.todo_list;
                let outcome = match todo.get(&task_id).map(|t| t.status()) {
                    Some(TaskStatus::Pending) => todo
                        .start(&task_id)
                        .and_then(|_| todo.complete(&task_id, result)),
                    _ => todo.complete(&task_id, result),
                };
                let obs = match outcome {
                    Ok(()) => json!({ "action": "complete_task", "task_id": task_id }),
                    Err(e) => error_observation("complete_task", &e.into()),
                };
                state.set_observation(obs);
            }

            Action::InvokeTool {
                tool,
                args,
                task_id,
            } => return self.invoke(state, tool, args, task_id, budget).await,
        }
        Step::Continue
    }

    /// 调用工具并把结果落到承载任务上
    async fn invoke(
        &self,
        state: &mut SessionState,
        tool: String,
        args: Value,
        task_id: Option<String>,
        budget: &CancellationToken,
    ) -> Step {
        let (task_id, implicit) = match task_id {
            Some(id) => {
                let prepared = match state.todo_list.get(&id).map(|t| t.status()) {
                    Some(TaskStatus::Pending) => state.todo_list.start(&id).map_err(AgentError::from),
                    Some(TaskStatus::InProgress) => Ok(()),
                    Some(status) => Err(AgentError::InvalidAction(format!(
                        "task {id} is already {status:?}"
                    ))),
                    None => Err(AgentError::InvalidAction(format!("unknown task {id}"))),
                };
                if let Err(e) = prepared {
                    state.set_observation(error_observation("invoke_tool", &e));
                    return Step::Continue;
                }
                (id, false)
            }
            None => {
                let created = state
                    .todo_list
                    .add(format!("invoke {tool}"), vec![])
                    .and_then(|id| state.todo_list.start(&id).map(|_| id));
                match created {
                    Ok(id) => (id, true),
                    Err(e) => {
                        state.set_observation(error_observation("invoke_tool", &e.into()));
                        return Step::Continue;
                    }
                }
            }
        };

        let args = if args.is_null() { json!({}) } else { args };
        self.send_event(LoopEvent::ToolCall {
            session_id: state.session_id.clone(),
            tool: tool.clone(),
            args: args.clone(),
        });

        match self.executor.execute(&tool, args, budget).await {
            Ok(output) => {
                if implicit {
                    // 只有隐式任务由循环代为完成；显式任务等 reasoner 给出 CompleteTask
                    let _ = state.todo_list.complete(&task_id, output.clone());
                }
                self.send_event(LoopEvent::Observation {
                    session_id: state.session_id.clone(),
                    tool: tool.clone(),
                    preview: preview(&output),
                });
                state.set_observation(json!({ "tool": tool, "task_id": task_id, "output": output }));
                Step::Continue
            }
            Err(AgentError::Cancelled) => Step::Interrupted,
            Err(e) => {
                tracing::info!(session_id = %state.session_id, tool = %tool, task_id = %task_id, "tool failed: {}", e);
                let _ = state.todo_list.fail(&task_id, e.to_string());
                self.send_event(LoopEvent::ToolFailure {
                    session_id: state.session_id.clone(),
                    tool: tool.clone(),
                    reason: e.to_string(),
                });
                state.set_observation(json!({
                    "tool": tool,
                    "task_id": task_id,
                    "error": e.to_string(),
                    "class": e.class(),
                }));
                Step::Continue
            }
        }
    }

    /// 取消或墙钟到期：以最后一次完整提交的快照为准
    async fn interrupted(&mut self, committed: SessionState) -> LoopReport {
        let outcome = if self.cancel.is_cancelled() {
            SessionOutcome::failed(ErrorClass::Cancelled, "session cancelled")
        } else {
            SessionOutcome::failed(
                ErrorClass::BudgetExceeded,
                format!(
                    "wall-clock ceiling of {}s reached",
                    self.config.max_wall_clock.as_secs_f64()
                ),
            )
        };
        self.finish(committed, outcome).await
    }

    async fn fail(&mut self, state: SessionState, err: AgentError) -> LoopReport {
        let outcome = SessionOutcome::failed(err.class(), err.to_string());
        self.finish(state, outcome).await
    }

    /// 写入终态快照（不可取消，仍按退避重试）并上报分析
    async fn finish(&mut self, mut state: SessionState, mut outcome: SessionOutcome) -> LoopReport {
        state.outcome = Some(outcome.clone());
        state.touch();
        if let Err(e) = self.checkpointer.commit(&state, None, |_, _| {}).await {
            tracing::warn!(session_id = %state.session_id, "final checkpoint failed: {}", e);
            if outcome.is_done() {
                outcome = SessionOutcome::failed(e.class(), e.to_string());
                state.outcome = Some(outcome.clone());
            }
        }

        let phase = if outcome.is_done() {
            LoopPhase::Done
        } else {
            LoopPhase::Failed
        };
        self.set_phase(phase, &state);
        match &outcome {
            SessionOutcome::Done { .. } => {
                tracing::info!(session_id = %state.session_id, iterations = state.iteration_count, "session done")
            }
            SessionOutcome::Failed { reason, message } => {
                tracing::warn!(session_id = %state.session_id, reason = %reason, "session failed: {}", message)
            }
        }
        if let Some(analytics) = &self.analytics {
            analytics.record_session(&state.session_id, &outcome);
        }
        self.send_event(LoopEvent::Finished {
            session_id: state.session_id.clone(),
            outcome: outcome.clone(),
        });
        LoopReport { outcome, state }
    }
}
