//! 核心执行层：状态存储、追踪、Executor 池、修订、调度与汇总

pub mod aggregator;
pub mod builder;
pub mod context;
pub mod error;
pub mod pool;
pub mod reviser;
pub mod scheduler;
pub mod shutdown;
pub mod state;
pub mod trace;

pub use aggregator::{aggregate, Outcome, OutcomeStatus, OutcomeSummary, StepReport};
pub use builder::EngineBuilder;
pub use context::ExecutionContext;
pub use error::{EngineError, FailureReason, SkipReason, TraceError};
pub use pool::{ExecutorPool, StepHandle};
pub use reviser::{
    DefaultRevisionPolicy, Revision, RevisionContext, RevisionPolicy, RevisionRecord, Reviser,
};
pub use scheduler::Scheduler;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{StateSnapshot, StateStore, StatusTransition};
pub use trace::{ReasoningSummary, TraceRecorder, TraceSnapshot};
