//! 推理策略：decide(step, history) -> Action | Done
//!
//! 具体如何选择工具由外部策略决定（可以是 LLM、规则或脚本）；引擎只负责驱动循环。
//! 内置 PlannedActionsPolicy：按步骤输入中的 actions 列表依次调用，未给出列表时调用与 kind 同名的工具。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::{Step, StepId};
use crate::tools::ToolError;

/// 一次工具调用（{"tool": "search_documents", "args": {...}}）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// 策略决策
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// 调用工具
    Action { tool_id: String, args: Value },
    /// 目标达成；result 为 None 时取最近一次成功的观察结果
    Done { result: Option<Value> },
}

impl Decision {
    pub fn action(tool_id: impl Into<String>, args: Value) -> Self {
        Self::Action {
            tool_id: tool_id.into(),
            args,
        }
    }

    pub fn done() -> Self {
        Self::Done { result: None }
    }
}

/// 一次 Act 的观察结果
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub iteration: usize,
    pub tool_id: String,
    pub outcome: Result<Value, ToolError>,
}

/// 本次尝试的迭代历史（Executor 私有的工作状态）
#[derive(Debug, Clone, Default)]
pub struct IterationHistory {
    /// 依赖步骤已发布的结果（从共享空间读取）
    pub dependency_results: BTreeMap<StepId, Value>,
    pub observations: Vec<Observation>,
}

impl IterationHistory {
    pub fn new(dependency_results: BTreeMap<StepId, Value>) -> Self {
        Self {
            dependency_results,
            observations: Vec::new(),
        }
    }

    /// 最近一次成功的观察结果
    pub fn last_success(&self) -> Option<&Value> {
        self.observations
            .iter()
            .rev()
            .find_map(|o| o.outcome.as_ref().ok())
    }

    pub fn successes(&self) -> usize {
        self.observations.iter().filter(|o| o.outcome.is_ok()).count()
    }
}

/// 推理策略 trait（同步决策：Executor 只在 Act 处挂起）
pub trait ReasoningPolicy: Send + Sync {
    /// Err(message) 会以 PolicyError 结束本次尝试
    fn decide(&self, step: &Step, history: &IterationHistory) -> Result<Decision, String>;
}

/// 按步骤输入执行的默认策略
///
/// - inputs.actions 为 ToolCall 列表时依次调用，全部成功后 Done
/// - 否则以 inputs 为参数调用与 kind 同名的工具一次；依赖结果附在 args.dependencies 下
/// - 可恢复的工具错误会原样重发同一调用，直到迭代上限
#[derive(Debug, Clone, Copy, Default)]
pub struct PlannedActionsPolicy;

impl PlannedActionsPolicy {
    fn planned_calls(step: &Step, history: &IterationHistory) -> Result<Vec<ToolCall>, String> {
        match step.inputs.get("actions") {
            Some(actions) => serde_json::from_value(actions.clone())
                .map_err(|e| format!("invalid actions for step {}: {}", step.id, e)),
            None => Ok(vec![ToolCall {
                tool: step.kind.clone(),
                args: with_dependencies(&step.inputs, &history.dependency_results),
            }]),
        }
    }
}

impl ReasoningPolicy for PlannedActionsPolicy {
    fn decide(&self, step: &Step, history: &IterationHistory) -> Result<Decision, String> {
        let calls = Self::planned_calls(step, history)?;
        let next = history.successes();
        match calls.get(next) {
            Some(call) => Ok(Decision::action(call.tool.clone(), call.args.clone())),
            None => Ok(Decision::done()),
        }
    }
}

/// 将依赖结果并入参数对象（参数非对象或已含 dependencies 时不改动）
fn with_dependencies(inputs: &Value, deps: &BTreeMap<StepId, Value>) -> Value {
    if deps.is_empty() {
        return inputs.clone();
    }
    let dependencies: serde_json::Map<String, Value> = deps
        .iter()
        .map(|(id, v)| (id.0.to_string(), v.clone()))
        .collect();
    match inputs {
        Value::Object(map) if !map.contains_key("dependencies") => {
            let mut map = map.clone();
            map.insert("dependencies".to_string(), Value::Object(dependencies));
            Value::Object(map)
        }
        Value::Null => serde_json::json!({ "dependencies": dependencies }),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_call_then_done() {
        let policy = PlannedActionsPolicy;
        let step = Step::new(1, "search_documents").with_inputs(serde_json::json!({"query": "q"}));
        let mut history = IterationHistory::default();

        let first = policy.decide(&step, &history).unwrap();
        assert_eq!(
            first,
            Decision::action("search_documents", serde_json::json!({"query": "q"}))
        );

        history.observations.push(Observation {
            iteration: 0,
            tool_id: "search_documents".to_string(),
            outcome: Ok(serde_json::json!(["doc"])),
        });
        assert_eq!(policy.decide(&step, &history).unwrap(), Decision::done());
        assert_eq!(history.last_success(), Some(&serde_json::json!(["doc"])));
    }

    #[test]
    fn test_recoverable_error_repeats_call() {
        let policy = PlannedActionsPolicy;
        let step = Step::new(1, "echo");
        let mut history = IterationHistory::default();
        history.observations.push(Observation {
            iteration: 0,
            tool_id: "echo".to_string(),
            outcome: Err(ToolError::new("busy", "try later").recoverable()),
        });
        assert!(matches!(
            policy.decide(&step, &history).unwrap(),
            Decision::Action { .. }
        ));
    }

    #[test]
    fn test_action_list() {
        let policy = PlannedActionsPolicy;
        let step = Step::new(1, "composite").with_inputs(serde_json::json!({
            "actions": [
                {"tool": "search_documents", "args": {"query": "q"}},
                {"tool": "summarize_report", "args": {}}
            ]
        }));
        let mut history = IterationHistory::default();
        history.observations.push(Observation {
            iteration: 0,
            tool_id: "search_documents".to_string(),
            outcome: Ok(Value::Null),
        });
        match policy.decide(&step, &history).unwrap() {
            Decision::Action { tool_id, .. } => assert_eq!(tool_id, "summarize_report"),
            other => panic!("Expected Action, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_action_list_is_policy_error() {
        let policy = PlannedActionsPolicy;
        let step = Step::new(1, "composite").with_inputs(serde_json::json!({"actions": 3}));
        assert!(policy.decide(&step, &IterationHistory::default()).is_err());
    }

    #[test]
    fn test_dependency_results_are_attached() {
        let mut deps = BTreeMap::new();
        deps.insert(StepId(1), serde_json::json!("found"));
        let args = with_dependencies(&serde_json::json!({"topic": "t"}), &deps);
        assert_eq!(args["dependencies"]["1"], "found");
        assert_eq!(args["topic"], "t");
        let untouched = with_dependencies(&serde_json::json!("raw"), &deps);
        assert_eq!(untouched, serde_json::json!("raw"));
    }
}
