//! 推理主循环（Executor）
//!
//! Think -> Act (Tool) -> Observe -> 下一轮 Think；有界状态机，迭代上限默认 5。
//! 循环内部从不重试：重试与修订全部由调度器 / Reviser 决定。
//! 取消为协作式：每轮迭代开始前检查，Act 等待工具期间同时监听取消信号。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::state::result_key;
use crate::core::{ExecutionContext, FailureReason, TraceError};
use crate::plan::{Step, StepId};
use crate::react::{Decision, IterationHistory, Observation, ReasoningPolicy, TracePhase};
use crate::tools::ToolGateway;

/// 单次尝试的执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub step_id: StepId,
    pub attempt: u32,
    /// 已开始的迭代数
    pub iterations: usize,
    pub result: Result<Value, FailureReason>,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    fn failed(step: &Step, iterations: usize, reason: FailureReason) -> Self {
        Self {
            step_id: step.id,
            attempt: step.attempt,
            iterations,
            result: Err(reason),
        }
    }
}

/// Executor：运行单个步骤的推理循环
pub struct Executor {
    gateway: Arc<dyn ToolGateway>,
    policy: Arc<dyn ReasoningPolicy>,
    max_iterations: usize,
}

impl Executor {
    pub fn new(
        gateway: Arc<dyn ToolGateway>,
        policy: Arc<dyn ReasoningPolicy>,
        max_iterations: usize,
    ) -> Self {
        Self {
            gateway,
            policy,
            max_iterations: max_iterations.max(1),
        }
    }

    /// 执行一次尝试；只写本步骤的追踪，不触碰任何步骤状态
    pub async fn execute(
        &self,
        step: &Step,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let mut history = IterationHistory::new(dependency_results(step, ctx).await);

        for iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                return StepOutcome::failed(step, iteration, FailureReason::Cancelled);
            }

            // Think
            let decision = self.policy.decide(step, &history);
            let think_payload = match &decision {
                Ok(d) => serde_json::to_value(d).unwrap_or(Value::Null),
                Err(message) => serde_json::json!({ "policy_error": message }),
            };
            if let Err(reason) = record(ctx, step, iteration, TracePhase::Think, think_payload).await {
                return StepOutcome::failed(step, iteration + 1, reason);
            }

            let (tool_id, args) = match decision {
                Err(message) => {
                    return StepOutcome::failed(
                        step,
                        iteration + 1,
                        FailureReason::PolicyError { message },
                    );
                }
                Ok(Decision::Done { result }) => {
                    let result = result
                        .or_else(|| history.last_success().cloned())
                        .unwrap_or(Value::Null);
                    tracing::debug!(step = %step.id, attempt = step.attempt, iteration, "done");
                    return StepOutcome {
                        step_id: step.id,
                        attempt: step.attempt,
                        iterations: iteration + 1,
                        result: Ok(result),
                    };
                }
                Ok(Decision::Action { tool_id, args }) => (tool_id, args),
            };

            // Act
            let act_payload = serde_json::json!({ "tool": tool_id, "args": args });
            if let Err(reason) = record(ctx, step, iteration, TracePhase::Act, act_payload).await {
                return StepOutcome::failed(step, iteration + 1, reason);
            }
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return StepOutcome::failed(step, iteration + 1, FailureReason::Cancelled);
                }
                outcome = self.gateway.invoke(&tool_id, args) => outcome,
            };

            // Observe
            let observe_payload = match &outcome {
                Ok(output) => serde_json::json!({ "tool": tool_id, "ok": true, "output": output }),
                Err(e) => serde_json::json!({
                    "tool": tool_id,
                    "ok": false,
                    "error": { "kind": e.kind, "message": e.message, "recoverable": e.recoverable },
                }),
            };
            if let Err(reason) =
                record(ctx, step, iteration, TracePhase::Observe, observe_payload).await
            {
                return StepOutcome::failed(step, iteration + 1, reason);
            }

            if let Err(e) = &outcome {
                if !e.recoverable {
                    tracing::warn!(step = %step.id, tool = %tool_id, error = %e, "tool failed");
                    return StepOutcome::failed(
                        step,
                        iteration + 1,
                        FailureReason::ToolError {
                            tool: tool_id,
                            kind: e.kind.clone(),
                            message: e.message.clone(),
                        },
                    );
                }
                tracing::debug!(step = %step.id, tool = %tool_id, error = %e, "recoverable tool error");
            }
            history.observations.push(Observation {
                iteration,
                tool_id,
                outcome,
            });
        }

        StepOutcome::failed(
            step,
            self.max_iterations,
            FailureReason::IterationLimitExceeded {
                limit: self.max_iterations,
            },
        )
    }
}

/// 读取依赖步骤已发布到共享空间的结果
async fn dependency_results(step: &Step, ctx: &ExecutionContext) -> BTreeMap<StepId, Value> {
    let mut results = BTreeMap::new();
    for dep in &step.depends_on {
        if let Some(value) = ctx.state().get_shared(&result_key(*dep)).await {
            results.insert(*dep, value);
        }
    }
    results
}

/// 追加追踪事件；尝试已封存说明取消信号已发出
async fn record(
    ctx: &ExecutionContext,
    step: &Step,
    iteration: usize,
    phase: TracePhase,
    payload: Value,
) -> Result<(), FailureReason> {
    match ctx
        .trace()
        .record(step.id, step.attempt, iteration, phase, payload)
        .await
    {
        Ok(()) => Ok(()),
        Err(TraceError::Sealed { .. }) => Err(FailureReason::Cancelled),
        Err(e) => {
            tracing::error!(step = %step.id, error = %e, "trace rejected event");
            Err(FailureReason::PolicyError {
                message: e.to_string(),
            })
        }
    }
}
