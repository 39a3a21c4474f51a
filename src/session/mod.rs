//! 会话数据模型：Task、TodoList、SessionState

pub mod state;
pub mod task;
pub mod todo;

pub use state::{
    is_valid_session_id, SessionId, SessionOutcome, SessionState, SessionSummary,
    LAST_OBSERVATION_KEY,
};
pub use task::{Task, TaskError, TaskId, TaskStatus};
pub use todo::TodoList;
