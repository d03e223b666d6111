//! 推理层：策略接口、过程事件与 Think / Act / Observe 主循环

pub mod events;
pub mod loop_;
pub mod policy;

pub use events::{TraceEvent, TracePhase};
pub use loop_::{Executor, StepOutcome};
pub use policy::{Decision, IterationHistory, Observation, PlannedActionsPolicy, ReasoningPolicy, ToolCall};
