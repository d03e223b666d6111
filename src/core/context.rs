//! 请求执行上下文
//!
//! 每个请求一个：持有 StateStore、TraceRecorder 与请求级中止令牌。克隆是浅拷贝，
//! 调度器与各 Executor 共享同一份存储。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::{StateStore, TraceRecorder};

/// 请求执行上下文
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    request_id: String,
    state: Arc<StateStore>,
    trace: Arc<TraceRecorder>,
    abort: CancellationToken,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// 新请求（追踪为预览模式）
    pub fn new() -> Self {
        Self::with_tracing(false)
    }

    /// 新请求，verbose 控制追踪详细程度
    pub fn with_tracing(verbose: bool) -> Self {
        let request_id = format!("req_{}", uuid::Uuid::new_v4());
        Self {
            state: Arc::new(StateStore::new(request_id.clone())),
            trace: Arc::new(TraceRecorder::new(verbose)),
            request_id,
            abort: CancellationToken::new(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn trace(&self) -> &Arc<TraceRecorder> {
        &self.trace
    }

    /// 请求级中止令牌：cancel() 即中止整个请求
    pub fn abort(&self) -> &CancellationToken {
        &self.abort
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }
}
