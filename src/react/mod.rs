//! 推理循环：Thinking → Acting → Checkpointing，事件与检查点

pub mod checkpoint;
pub mod events;
pub mod loop_;

pub use checkpoint::Checkpointer;
pub use events::{LoopEvent, LoopPhase};
pub use loop_::{LoopConfig, LoopReport, ReasoningLoop};
