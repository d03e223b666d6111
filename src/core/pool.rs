//! Executor 池：有界并发
//!
//! 每次提交派生一个任务，任务先获取 Semaphore 许可再运行 Executor；池满时提交的步骤排队等待许可。
//! 超时计时器也在任务内：到时先封存该尝试的追踪，再取消步骤令牌，结果记为 Timeout。

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{ExecutionContext, FailureReason};
use crate::plan::{Step, StepId};
use crate::react::{Executor, StepOutcome};

/// 活跃计数守卫：任务结束（含 panic）时归还
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(active))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 已提交步骤的句柄：await 得到 StepOutcome
pub struct StepHandle {
    step_id: StepId,
    attempt: u32,
    cancel: CancellationToken,
    join: JoinHandle<StepOutcome>,
}

impl StepHandle {
    pub fn step_id(&self) -> StepId {
        self.step_id
    }

    /// 协作式取消该步骤
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Future for StepHandle {
    type Output = StepOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let step_id = self.step_id;
        let attempt = self.attempt;
        Pin::new(&mut self.join).poll(cx).map(|joined| {
            joined.unwrap_or_else(|e| {
                tracing::error!(step = %step_id, error = %e, "executor task aborted");
                StepOutcome {
                    step_id,
                    attempt,
                    iterations: 0,
                    result: Err(if e.is_cancelled() {
                        FailureReason::Cancelled
                    } else {
                        FailureReason::PolicyError {
                            message: format!("executor panicked: {e}"),
                        }
                    }),
                }
            })
        })
    }
}

/// Executor 池
pub struct ExecutorPool {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    executor: Arc<Executor>,
}

impl ExecutorPool {
    pub fn new(capacity: usize, executor: Arc<Executor>) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            active: Arc::new(AtomicUsize::new(0)),
            executor,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 空闲许可数
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// 正在运行的 Executor 数
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// 提交一次尝试；cancel 为该步骤的令牌（通常是请求中止令牌的子令牌）
    pub fn submit(&self, step: Step, ctx: ExecutionContext, cancel: CancellationToken) -> StepHandle {
        let step_id = step.id;
        let attempt = step.attempt;
        let semaphore = Arc::clone(&self.semaphore);
        let active = Arc::clone(&self.active);
        let executor = Arc::clone(&self.executor);
        let token = cancel.clone();

        let join = tokio::spawn(async move {
            let _permit = tokio::select! {
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        return StepOutcome {
                            step_id,
                            attempt,
                            iterations: 0,
                            result: Err(FailureReason::Cancelled),
                        };
                    }
                },
                _ = token.cancelled() => {
                    return StepOutcome {
                        step_id,
                        attempt,
                        iterations: 0,
                        result: Err(FailureReason::Cancelled),
                    };
                }
            };
            let _guard = ActiveGuard::new(&active);

            let run = executor.execute(&step, &ctx, &token);
            tokio::pin!(run);
            match step.timeout {
                Some(limit) => {
                    tokio::select! {
                        outcome = &mut run => outcome,
                        _ = tokio::time::sleep(limit) => {
                            ctx.trace().seal_attempt(step_id, attempt).await;
                            token.cancel();
                            let outcome = run.await;
                            tracing::warn!(step = %step_id, attempt, timeout = ?limit, "step timed out");
                            StepOutcome {
                                result: Err(FailureReason::Timeout),
                                ..outcome
                            }
                        }
                    }
                }
                None => run.await,
            }
        });

        StepHandle {
            step_id,
            attempt,
            cancel,
            join,
        }
    }
}
