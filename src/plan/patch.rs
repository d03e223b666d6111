//! 计划补丁
//!
//! Reviser 产出的是纯值 PlanPatch，由调度器调用 Plan::apply_patch 合并；
//! 合并在副本上进行并重新做无环校验，失败时原计划保持不变。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::plan::types::*;

/// 替换失败步骤的内容（同一 ID）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Substitution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

/// 计划补丁
#[derive(Debug, Clone, PartialEq)]
pub enum PlanPatch {
    /// 原样重试
    Retry { target: StepId },
    /// 同 ID 替换 kind / inputs / timeout 后重试
    Substitute {
        target: StepId,
        substitution: Substitution,
    },
    /// 插入恢复步骤作为前置；retry_as 为 Some 时以新 ID 复制失败步骤重试，
    /// 依赖原步骤的步骤改为依赖副本
    Recover {
        target: StepId,
        recovery_steps: Vec<Step>,
        retry_as: Option<StepId>,
    },
    /// 放弃该步骤但不级联：标记 Skipped，依赖方照常推进
    Skip { target: StepId, reason: String },
}

impl PlanPatch {
    pub fn target(&self) -> StepId {
        match self {
            Self::Retry { target }
            | Self::Substitute { target, .. }
            | Self::Recover { target, .. }
            | Self::Skip { target, .. } => *target,
        }
    }

    /// 是否会把失败步骤本身退回 Pending
    pub fn requeues_target(&self) -> bool {
        match self {
            Self::Retry { .. } | Self::Substitute { .. } => true,
            Self::Recover { retry_as, .. } => retry_as.is_none(),
            Self::Skip { .. } => false,
        }
    }

    /// 是否向计划插入新步骤（恢复步骤或副本）
    pub fn inserts_steps(&self) -> bool {
        match self {
            Self::Recover {
                recovery_steps,
                retry_as,
                ..
            } => !recovery_steps.is_empty() || retry_as.is_some(),
            _ => false,
        }
    }

    /// 修订类型名（记录与日志用）
    pub fn label(&self) -> &'static str {
        match self {
            Self::Retry { .. } => "retry",
            Self::Substitute { .. } => "substitute",
            Self::Recover { .. } => "recover",
            Self::Skip { .. } => "skip",
        }
    }
}

/// 合并后调度器需要执行的状态迁移
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchTransition {
    /// 失败步骤退回 Pending
    Requeue(StepId),
    /// 失败步骤终止为 Failed，由副本接替
    Supersede { target: StepId, replacement: StepId },
    /// 失败步骤标记 Skipped
    Skip { target: StepId, reason: String },
}

/// 合并结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchEffect {
    /// 新插入的步骤（均为 Pending）
    pub inserted: Vec<StepId>,
    /// 内容或依赖被修改的已有步骤
    pub modified: Vec<StepId>,
    pub transition: PatchTransition,
}

impl Plan {
    /// 合并补丁（纯函数式：先在副本上应用并校验，成功后整体替换）
    pub fn apply_patch(&mut self, patch: &PlanPatch) -> Result<PatchEffect, PlanError> {
        let target_id = patch.target();
        let target = self
            .steps
            .get(&target_id)
            .cloned()
            .ok_or_else(|| PlanError::Malformed(format!("patch targets unknown step {}", target_id)))?;

        let mut next = self.clone();
        let mut inserted = Vec::new();
        let mut modified = Vec::new();

        let transition = match patch {
            PlanPatch::Retry { .. } => PatchTransition::Requeue(target_id),
            PlanPatch::Substitute { substitution, .. } => {
                if let Some(step) = next.steps.get_mut(&target_id) {
                    if let Some(kind) = &substitution.kind {
                        step.kind = kind.clone();
                    }
                    if let Some(inputs) = &substitution.inputs {
                        step.inputs = inputs.clone();
                    }
                    if let Some(timeout) = substitution.timeout {
                        step.timeout = Some(timeout);
                    }
                }
                modified.push(target_id);
                PatchTransition::Requeue(target_id)
            }
            PlanPatch::Recover {
                recovery_steps,
                retry_as,
                ..
            } => {
                for recovery in recovery_steps {
                    if next.steps.contains_key(&recovery.id) {
                        return Err(PlanError::DuplicateStep(recovery.id));
                    }
                    let mut recovery = recovery.clone();
                    recovery.status = StepStatus::Pending;
                    recovery.attempt = 0;
                    recovery.result = None;
                    inserted.push(recovery.id);
                    next.steps.insert(recovery.id, recovery);
                }

                match retry_as {
                    None => {
                        if let Some(step) = next.steps.get_mut(&target_id) {
                            step.depends_on.extend(recovery_steps.iter().map(|s| s.id));
                        }
                        modified.push(target_id);
                        PatchTransition::Requeue(target_id)
                    }
                    Some(copy_id) => {
                        if next.steps.contains_key(copy_id) {
                            return Err(PlanError::DuplicateStep(*copy_id));
                        }
                        let mut copy = target.clone();
                        copy.id = *copy_id;
                        copy.attempt = 0;
                        copy.status = StepStatus::Pending;
                        copy.result = None;
                        copy.depends_on.extend(recovery_steps.iter().map(|s| s.id));

                        for dependent in next.dependents_of(target_id) {
                            if let Some(step) = next.steps.get_mut(&dependent) {
                                step.depends_on.remove(&target_id);
                                step.depends_on.insert(*copy_id);
                                modified.push(dependent);
                            }
                        }
                        if next.required.remove(&target_id) {
                            next.required.insert(*copy_id);
                        }
                        for group in next.parallel_groups.iter_mut() {
                            if group.remove(&target_id) {
                                group.insert(*copy_id);
                            }
                        }

                        inserted.push(*copy_id);
                        next.steps.insert(*copy_id, copy);
                        PatchTransition::Supersede {
                            target: target_id,
                            replacement: *copy_id,
                        }
                    }
                }
            }
            PlanPatch::Skip { reason, .. } => PatchTransition::Skip {
                target: target_id,
                reason: reason.clone(),
            },
        };

        next.validate()?;
        *self = next;

        Ok(PatchEffect {
            inserted,
            modified,
            transition,
        })
    }
}
