//! 核心编排层：错误与恢复、会话监管、会话调度、目标拆分、编排器

pub mod decomposer;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod task_scheduler;

pub use decomposer::{GoalDecomposer, LineDecomposer, SingleGoal};
pub use error::{AgentError, ErrorClass};
pub use orchestrator::{AggregateStatus, JobId, OrchestrationJob, Orchestrator, OrchestratorBuilder};
pub use recovery::{BackoffPolicy, RecoveryAction, RecoveryEngine};
pub use session_supervisor::SessionSupervisor;
pub use task_scheduler::{SessionPermit, SessionScheduler};
