//! 计划修订（Reviser）
//!
//! 步骤失败时由可插拔的 RevisionPolicy 给出 PlanPatch（retry / substitute / recover / skip / 无），
//! Reviser 负责约束与合并：尝试耗尽后不再接受把原步骤退回 Pending 的补丁，请求内插入新步骤的修订
//! 次数有上限（retry / substitute 只受步骤自身的 max_attempts 约束），合并在计划副本上进行并重新校验无环。
//! 每次合并都留下一条 RevisionRecord。

use std::sync::Arc;

use serde::Serialize;

use crate::config::ReviserSection;
use crate::core::FailureReason;
use crate::plan::{PatchEffect, Plan, PlanPatch, Step, StepId, Substitution};
use crate::react::TraceEvent;

/// 修订策略的输入
pub struct RevisionContext<'a> {
    pub step: &'a Step,
    pub reason: &'a FailureReason,
    /// 该步骤迄今为止的全部追踪事件
    pub history: &'a [TraceEvent],
    pub plan: &'a Plan,
    /// 本请求已有的修订记录
    pub prior: &'a [RevisionRecord],
    /// 失败步骤是否已用尽尝试次数
    pub attempts_exhausted: bool,
}

impl RevisionContext<'_> {
    /// 该步骤此前是否已经插入过恢复步骤
    pub fn recovered_before(&self) -> bool {
        self.prior
            .iter()
            .any(|r| r.step_id == self.step.id && r.revision == "recover")
    }
}

/// 修订策略 trait：同样的输入必须给出同样的补丁
pub trait RevisionPolicy: Send + Sync {
    fn propose(&self, ctx: &RevisionContext<'_>) -> Option<PlanPatch>;
}

/// 修订记录（含变更分析）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevisionRecord {
    pub seq: usize,
    pub step_id: StepId,
    /// retry / substitute / recover / skip
    pub revision: String,
    /// 触发修订的失败原因代码
    pub reason: String,
    pub attempt: u32,
    pub steps_before: usize,
    pub steps_after: usize,
    pub added: Vec<StepId>,
    pub modified: Vec<StepId>,
}

/// 默认修订策略（确定性）
///
/// - Timeout：同 ID 替换，超时乘以 timeout_growth
/// - 工具（或步骤类别）配置了替代类别：同 ID 替换 kind
/// - insufficient_data / 迭代超限，且首次：插入恢复步骤作为前置（步骤 ID 已耗尽时原样重试）
/// - 其余仍有尝试次数：原样重试
/// - 尝试耗尽：skip_non_required 且非必需则跳过，否则无补丁
pub struct DefaultRevisionPolicy {
    section: ReviserSection,
}

impl DefaultRevisionPolicy {
    pub fn new(section: ReviserSection) -> Self {
        Self { section }
    }

    fn alternative_for(&self, step: &Step, reason: &FailureReason) -> Option<String> {
        let tool = match reason {
            FailureReason::ToolError { tool, .. } => Some(tool.as_str()),
            _ => None,
        };
        tool.and_then(|t| self.section.alternatives.get(t))
            .or_else(|| self.section.alternatives.get(&step.kind))
            .filter(|alt| **alt != step.kind)
            .cloned()
    }

    fn recovery_step(&self, ctx: &RevisionContext<'_>) -> Option<Step> {
        let id = ctx.plan.next_step_id()?;
        let step = ctx.step;
        let label = if step.description.is_empty() {
            step.kind.as_str()
        } else {
            step.description.as_str()
        };
        let recovery = Step::new(id, self.section.recovery_kind.clone())
            .with_description(format!("Recover from failed step: {}", label))
            .with_inputs(serde_json::json!({
                "failed_step": step.id.0,
                "kind": step.kind,
                "reason": ctx.reason.to_string(),
                "inputs": step.inputs,
            }))
            .depends_on(step.depends_on.iter().copied())
            .with_priority(step.priority)
            .with_max_attempts(1);
        Some(recovery)
    }
}

impl RevisionPolicy for DefaultRevisionPolicy {
    fn propose(&self, ctx: &RevisionContext<'_>) -> Option<PlanPatch> {
        let step = ctx.step;
        if matches!(ctx.reason, FailureReason::Cancelled) {
            return None;
        }

        if ctx.attempts_exhausted {
            return (self.section.skip_non_required && !ctx.plan.is_required(step.id)).then(|| {
                PlanPatch::Skip {
                    target: step.id,
                    reason: format!("optional step gave up: {}", ctx.reason),
                }
            });
        }

        if let FailureReason::Timeout = ctx.reason {
            let timeout = step
                .timeout
                .map(|t| t.saturating_mul(self.section.timeout_growth.max(1)));
            return Some(PlanPatch::Substitute {
                target: step.id,
                substitution: Substitution {
                    timeout,
                    ..Default::default()
                },
            });
        }

        if let Some(kind) = self.alternative_for(step, ctx.reason) {
            return Some(PlanPatch::Substitute {
                target: step.id,
                substitution: Substitution {
                    kind: Some(kind),
                    ..Default::default()
                },
            });
        }

        let needs_recovery = match ctx.reason {
            FailureReason::ToolError { kind, .. } => kind == "insufficient_data",
            FailureReason::IterationLimitExceeded { .. } => true,
            _ => false,
        };
        if needs_recovery && !ctx.recovered_before() {
            if let Some(recovery) = self.recovery_step(ctx) {
                return Some(PlanPatch::Recover {
                    target: step.id,
                    recovery_steps: vec![recovery],
                    retry_as: None,
                });
            }
        }

        Some(PlanPatch::Retry { target: step.id })
    }
}

/// 修订结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revision {
    /// 补丁已合并
    Applied(PatchEffect),
    /// 无补丁：终态失败并级联
    Unrecoverable,
}

/// Reviser：约束策略输出并合并补丁
pub struct Reviser {
    policy: Arc<dyn RevisionPolicy>,
    max_revisions: usize,
    records: Vec<RevisionRecord>,
}

impl Reviser {
    pub fn new(policy: Arc<dyn RevisionPolicy>, max_revisions: usize) -> Self {
        Self {
            policy,
            max_revisions,
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[RevisionRecord] {
        &self.records
    }

    /// 已合并的插入步骤类修订数
    fn inserted_revisions(&self) -> usize {
        self.records.iter().filter(|r| !r.added.is_empty()).count()
    }

    /// 针对失败步骤求补丁并合并到计划
    pub fn revise(
        &mut self,
        plan: &mut Plan,
        failed: StepId,
        reason: &FailureReason,
        history: &[TraceEvent],
    ) -> Revision {
        let Some(step) = plan.get(failed).cloned() else {
            return Revision::Unrecoverable;
        };
        let attempts_exhausted = !step.has_attempts_left();
        let ctx = RevisionContext {
            step: &step,
            reason,
            history,
            plan,
            prior: &self.records,
            attempts_exhausted,
        };
        let Some(patch) = self.policy.propose(&ctx) else {
            return Revision::Unrecoverable;
        };

        if patch.target() != failed {
            tracing::warn!(step = %failed, target = %patch.target(), "patch targets another step, ignored");
            return Revision::Unrecoverable;
        }
        if patch.inserts_steps() && self.inserted_revisions() >= self.max_revisions {
            tracing::warn!(
                step = %failed,
                revision = patch.label(),
                budget = self.max_revisions,
                "revision budget exhausted"
            );
            return Revision::Unrecoverable;
        }
        if attempts_exhausted && patch.requeues_target() {
            tracing::warn!(
                step = %failed,
                revision = patch.label(),
                "attempts exhausted, patch would re-queue the step"
            );
            return Revision::Unrecoverable;
        }

        let steps_before = plan.len();
        match plan.apply_patch(&patch) {
            Ok(effect) => {
                let record = RevisionRecord {
                    seq: self.records.len(),
                    step_id: failed,
                    revision: patch.label().to_string(),
                    reason: reason.code().to_string(),
                    attempt: step.attempt,
                    steps_before,
                    steps_after: plan.len(),
                    added: effect.inserted.clone(),
                    modified: effect.modified.clone(),
                };
                tracing::info!(
                    step = %failed,
                    revision = %record.revision,
                    reason = %record.reason,
                    added = record.added.len(),
                    "plan revised"
                );
                self.records.push(record);
                Revision::Applied(effect)
            }
            Err(e) => {
                tracing::warn!(step = %failed, error = %e, "patch rejected");
                Revision::Unrecoverable
            }
        }
    }
}
