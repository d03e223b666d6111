//! 结果汇总（Aggregator）
//!
//! 计划到达终态后，把每个步骤的结果 / 失败原因 / 跳过原因、推理摘要与修订历史合并为一个 Outcome。
//! 纯函数：输出只依赖输入，不含时间戳，同一终态重复汇总得到相同结果。

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::core::state::StateSnapshot;
use crate::core::trace::{summarize, TraceSnapshot};
use crate::core::{FailureReason, ReasoningSummary, RevisionRecord, SkipReason};
use crate::plan::{Plan, StepId, StepStatus};

/// 请求整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    PartialSuccess,
    Failure,
}

/// 单个步骤的报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub kind: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<SkipReason>,
    /// 失败后由副本接替
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<StepId>,
    pub reasoning: ReasoningSummary,
}

/// 汇总摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeSummary {
    pub total_steps: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub revisions: usize,
    /// 修订新增的步骤数
    pub steps_added: usize,
    pub reasoning: ReasoningSummary,
    /// 每个未成功步骤一行说明
    pub explanations: Vec<String>,
}

/// 请求最终结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub request_id: String,
    pub status: OutcomeStatus,
    pub steps: BTreeMap<StepId, StepReport>,
    pub summary: OutcomeSummary,
    pub revisions: Vec<RevisionRecord>,
}

/// 汇总终态计划
pub fn aggregate(
    plan: &Plan,
    state: &StateSnapshot,
    trace: &TraceSnapshot,
    revisions: &[RevisionRecord],
) -> Outcome {
    let mut steps = BTreeMap::new();
    let mut explanations = Vec::new();

    for (id, step) in &plan.steps {
        let report = StepReport {
            kind: step.kind.clone(),
            status: step.status,
            attempts: step.attempt,
            required: plan.is_required(*id),
            result: step
                .result
                .clone()
                .or_else(|| state.results.get(id).cloned())
                .filter(|_| step.status == StepStatus::Succeeded),
            failure: state.failures.get(id).cloned(),
            skip: state.skips.get(id).cloned(),
            superseded_by: state.superseded.get(id).copied(),
            reasoning: summarize(trace.get(id).into_iter().flatten()),
        };
        if let Some(line) = explain(*id, &report) {
            explanations.push(line);
        }
        steps.insert(*id, report);
    }

    let status = outcome_status(plan, &steps);
    let summary = OutcomeSummary {
        total_steps: plan.len(),
        succeeded: plan.count(StepStatus::Succeeded),
        failed: plan.count(StepStatus::Failed),
        skipped: plan.count(StepStatus::Skipped),
        revisions: revisions.len(),
        steps_added: revisions.iter().map(|r| r.added.len()).sum(),
        reasoning: summarize(trace.values().flatten()),
        explanations,
    };

    Outcome {
        request_id: state.request_id.clone(),
        status,
        steps,
        summary,
        revisions: revisions.to_vec(),
    }
}

/// 整体状态：
/// - 任一必需步骤未成功 -> Failure
/// - 有成功步骤，同时有失败 / 跳过 -> PartialSuccess（已被成功副本接替的失败步骤不计）
/// - 无成功步骤但有失败 / 跳过 -> Failure
/// - 否则 Success
fn outcome_status(plan: &Plan, steps: &BTreeMap<StepId, StepReport>) -> OutcomeStatus {
    let required_ok = plan.required.iter().all(|id| {
        steps
            .get(id)
            .map(|r| r.status == StepStatus::Succeeded)
            .unwrap_or(false)
    });
    if !required_ok {
        return OutcomeStatus::Failure;
    }

    let replaced_ok = |report: &StepReport| {
        report
            .superseded_by
            .and_then(|r| steps.get(&r))
            .map(|r| r.status == StepStatus::Succeeded)
            .unwrap_or(false)
    };
    let succeeded = steps
        .values()
        .any(|r| r.status == StepStatus::Succeeded);
    let unsuccessful = steps.values().any(|r| {
        matches!(r.status, StepStatus::Failed | StepStatus::Skipped) && !replaced_ok(r)
    });

    match (succeeded, unsuccessful) {
        (_, false) => OutcomeStatus::Success,
        (true, true) => OutcomeStatus::PartialSuccess,
        (false, true) => OutcomeStatus::Failure,
    }
}

fn explain(id: StepId, report: &StepReport) -> Option<String> {
    match report.status {
        StepStatus::Failed => {
            let reason = report
                .failure
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown failure".to_string());
            Some(match report.superseded_by {
                Some(copy) => format!("{} ({}) failed: {}; retried as {}", id, report.kind, reason, copy),
                None => format!("{} ({}) failed: {}", id, report.kind, reason),
            })
        }
        StepStatus::Skipped => {
            let reason = report
                .skip
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "skipped".to_string());
            Some(format!("{} ({}) skipped: {}", id, report.kind, reason))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StateStore;
    use crate::plan::Step;

    fn settled(id: u64, status: StepStatus) -> Step {
        Step {
            status,
            attempt: 1,
            result: (status == StepStatus::Succeeded).then(|| serde_json::json!(id)),
            ..Step::new(id, "work")
        }
    }

    async fn empty_state() -> StateSnapshot {
        StateStore::new("req_agg").snapshot().await
    }

    #[tokio::test]
    async fn test_all_succeeded() {
        let plan = Plan::from_steps(vec![
            settled(1, StepStatus::Succeeded),
            settled(2, StepStatus::Succeeded),
        ])
        .unwrap();
        let outcome = aggregate(&plan, &empty_state().await, &TraceSnapshot::new(), &[]);
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.summary.succeeded, 2);
        assert_eq!(outcome.steps[&StepId(2)].result, Some(serde_json::json!(2)));
        assert!(outcome.summary.explanations.is_empty());
    }

    #[tokio::test]
    async fn test_partial_success_and_required_failure() {
        let mut plan = Plan::from_steps(vec![
            settled(1, StepStatus::Succeeded),
            settled(2, StepStatus::Failed),
        ])
        .unwrap();
        let state = empty_state().await;
        let outcome = aggregate(&plan, &state, &TraceSnapshot::new(), &[]);
        assert_eq!(outcome.status, OutcomeStatus::PartialSuccess);
        assert_eq!(outcome.summary.explanations.len(), 1);

        plan.required.insert(StepId(2));
        let outcome = aggregate(&plan, &state, &TraceSnapshot::new(), &[]);
        assert_eq!(outcome.status, OutcomeStatus::Failure);
    }

    #[tokio::test]
    async fn test_nothing_succeeded_is_failure() {
        let plan = Plan::from_steps(vec![settled(1, StepStatus::Failed)]).unwrap();
        let outcome = aggregate(&plan, &empty_state().await, &TraceSnapshot::new(), &[]);
        assert_eq!(outcome.status, OutcomeStatus::Failure);
    }

    #[tokio::test]
    async fn test_superseded_failure_does_not_degrade() {
        let plan = Plan::from_steps(vec![
            settled(1, StepStatus::Failed),
            settled(2, StepStatus::Succeeded),
        ])
        .unwrap();
        let store = StateStore::new("req_agg");
        store.set_superseded(StepId(1), StepId(2)).await;
        let outcome = aggregate(&plan, &store.snapshot().await, &TraceSnapshot::new(), &[]);
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert!(outcome.summary.explanations[0].contains("retried as #2"));
    }

    #[tokio::test]
    async fn test_outcome_serializes_failures_and_skips() {
        let plan = Plan::from_steps(vec![
            settled(1, StepStatus::Succeeded),
            settled(2, StepStatus::Failed),
            settled(3, StepStatus::Skipped),
            settled(4, StepStatus::Skipped),
        ])
        .unwrap();
        let store = StateStore::new("req_json");
        store
            .set_failure(
                StepId(2),
                FailureReason::Unrecoverable {
                    attempts: 3,
                    last: Box::new(FailureReason::Timeout),
                },
            )
            .await;
        store
            .set_skip(
                StepId(3),
                SkipReason::Revised {
                    reason: "optional step".to_string(),
                },
            )
            .await;
        store
            .set_skip(
                StepId(4),
                SkipReason::DependencyFailed {
                    dependency: StepId(2),
                },
            )
            .await;

        let outcome = aggregate(&plan, &store.snapshot().await, &TraceSnapshot::new(), &[]);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["request_id"], "req_json");
        assert_eq!(json["status"], "partial_success");
        assert_eq!(json["steps"]["2"]["failure"]["reason"], "unrecoverable");
        assert_eq!(json["steps"]["2"]["failure"]["last"]["reason"], "timeout");
        assert_eq!(json["steps"]["3"]["skip"]["skip"], "revised");
        assert_eq!(json["steps"]["3"]["skip"]["reason"], "optional step");
        assert_eq!(json["steps"]["4"]["skip"]["skip"], "dependency_failed");
        assert_eq!(json["summary"]["skipped"], 2);
    }

    #[tokio::test]
    async fn test_aggregate_is_idempotent() {
        let plan = Plan::from_steps(vec![
            settled(1, StepStatus::Succeeded),
            settled(2, StepStatus::Skipped),
        ])
        .unwrap();
        let state = empty_state().await;
        let trace = TraceSnapshot::new();
        let first = aggregate(&plan, &state, &trace, &[]);
        let second = aggregate(&plan, &state, &trace, &[]);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
