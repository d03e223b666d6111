//! 计划类型定义
//!
//! 定义步骤、计划、状态与计划错误等核心数据类型。计划由外部 Planner 提供（JSON），
//! 调度器独占其拓扑与状态迁移。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EngineSection;

/// 步骤 ID：数值型，就绪步骤同优先级时按 ID 升序派发
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub u64);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for StepId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// 步骤状态
///
/// 单调迁移：Pending → Ready → Running → {Succeeded | Failed | Skipped}；
/// Failed 仅能由 Reviser 在尝试次数未耗尽时退回 Pending。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    /// 等待依赖满足
    Pending,
    /// 依赖已满足，等待派发
    Ready,
    /// 正在执行
    Running,
    /// 已成功
    Succeeded,
    /// 失败
    Failed,
    /// 跳过（依赖失败、修订跳过或请求中止）
    Skipped,
}

impl StepStatus {
    /// 对依赖方而言是否视为「已满足」
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Ready | Self::Running)
    }
}

/// 步骤优先级（越大越先派发）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl Default for StepPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// 计划中的一个步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    /// 类别标签（对引擎不透明，默认策略将其视为工具 ID）
    pub kind: String,
    #[serde(default)]
    pub description: String,
    /// 输入负载（不透明）
    #[serde(default)]
    pub inputs: serde_json::Value,
    #[serde(default)]
    pub depends_on: BTreeSet<StepId>,
    #[serde(default)]
    pub priority: StepPriority,
    /// 单次尝试超时；未设置时取配置默认值
    #[serde(default, with = "duration_secs_opt")]
    pub timeout: Option<Duration>,
    /// 最大尝试次数；未设置时取配置默认值
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// 当前尝试序号（首次派发时为 1）
    #[serde(default)]
    pub attempt: u32,
    #[serde(default = "default_status")]
    pub status: StepStatus,
    /// 成功后的结果
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

fn default_status() -> StepStatus {
    StepStatus::Pending
}

impl Step {
    pub fn new(id: impl Into<StepId>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            description: String::new(),
            inputs: serde_json::Value::Null,
            depends_on: BTreeSet::new(),
            priority: StepPriority::Normal,
            timeout: None,
            max_attempts: None,
            attempt: 0,
            status: StepStatus::Pending,
            result: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_inputs(mut self, inputs: serde_json::Value) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = impl Into<StepId>>) -> Self {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: StepPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// 生效的最大尝试次数（至少 1）
    pub fn attempt_limit(&self) -> u32 {
        self.max_attempts.unwrap_or(1).max(1)
    }

    /// 是否还允许再尝试一次
    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.attempt_limit()
    }

    pub fn is_terminal(&self) -> bool {
        !self.status.is_active()
    }
}

/// 计划：步骤 ID → 步骤，加上 Planner 给出的并行分组提示与必需步骤标注
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PlanDocument")]
pub struct Plan {
    #[serde(serialize_with = "serialize_steps")]
    pub steps: BTreeMap<StepId, Step>,
    /// 建议可一起运行的步骤集合（仅提示，不影响正确性与派发顺序）
    #[serde(default)]
    pub parallel_groups: Vec<BTreeSet<StepId>>,
    /// 必需步骤：任一未成功则整体结果为 Failure
    #[serde(default)]
    pub required: BTreeSet<StepId>,
}

impl Plan {
    /// 从步骤列表构建，重复 ID 直接报错
    pub fn from_steps(steps: impl IntoIterator<Item = Step>) -> Result<Self, PlanError> {
        let mut map = BTreeMap::new();
        for step in steps {
            let id = step.id;
            if map.insert(id, step).is_some() {
                return Err(PlanError::DuplicateStep(id));
            }
        }
        Ok(Self {
            steps: map,
            parallel_groups: Vec::new(),
            required: BTreeSet::new(),
        })
    }

    /// 从 Planner 的 JSON 交接格式解析（重复 ID 报 DuplicateStep）
    pub fn from_json(raw: &str) -> Result<Self, PlanError> {
        serde_json::from_str::<PlanDocument>(raw)
            .map_err(|e| PlanError::Malformed(e.to_string()))?
            .try_into()
    }

    pub fn get(&self, id: StepId) -> Option<&Step> {
        self.steps.get(&id)
    }

    pub fn get_mut(&mut self, id: StepId) -> Option<&mut Step> {
        self.steps.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_required(&self, id: StepId) -> bool {
        self.required.contains(&id)
    }

    /// 派生边集：(依赖, 依赖方)
    pub fn edges(&self) -> Vec<(StepId, StepId)> {
        self.steps
            .values()
            .flat_map(|s| s.depends_on.iter().map(move |d| (*d, s.id)))
            .collect()
    }

    /// 下一个可用的步骤 ID（修订插入新步骤时使用）；ID 已用到 u64::MAX 时为 None
    pub fn next_step_id(&self) -> Option<StepId> {
        match self.steps.keys().next_back() {
            Some(last) => last.0.checked_add(1).map(StepId),
            None => Some(StepId(1)),
        }
    }

    /// 直接依赖 id 的步骤（升序）
    pub fn dependents_of(&self, id: StepId) -> Vec<StepId> {
        self.steps
            .values()
            .filter(|s| s.depends_on.contains(&id))
            .map(|s| s.id)
            .collect()
    }

    /// 传递依赖 id 的全部步骤（不含 id 本身，升序）
    pub fn transitive_dependents(&self, id: StepId) -> BTreeSet<StepId> {
        let mut seen = BTreeSet::new();
        let mut frontier = vec![id];
        while let Some(current) = frontier.pop() {
            for dependent in self.dependents_of(current) {
                if seen.insert(dependent) {
                    frontier.push(dependent);
                }
            }
        }
        seen
    }

    /// 用配置补全未设置的超时与尝试次数
    pub fn resolve_defaults(&mut self, engine: &EngineSection) {
        for step in self.steps.values_mut() {
            if step.timeout.is_none() {
                step.timeout = Some(Duration::from_secs(engine.default_step_timeout_secs));
            }
            if step.max_attempts.is_none() {
                step.max_attempts = Some(engine.default_max_attempts.max(1));
            }
        }
    }

    /// 某状态的步骤数
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.values().filter(|s| s.status == status).count()
    }

    /// 是否已无 Pending / Ready / Running 步骤
    pub fn is_settled(&self) -> bool {
        self.steps.values().all(Step::is_terminal)
    }
}

/// 计划错误：加载时致命，执行从不开始
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Cyclic dependency detected among steps {0:?}")]
    CyclicDependency(Vec<StepId>),
    #[error("Step {step} depends on unknown step {missing}")]
    UnknownDependency { step: StepId, missing: StepId },
    #[error("Duplicate step id {0}")]
    DuplicateStep(StepId),
    #[error("Malformed plan: {0}")]
    Malformed(String),
}

/// Planner 交接格式：步骤为列表，转换为 Plan 时检测重复 ID
#[derive(Debug, Deserialize)]
struct PlanDocument {
    steps: Vec<Step>,
    #[serde(default)]
    parallel_groups: Vec<BTreeSet<StepId>>,
    #[serde(default)]
    required: BTreeSet<StepId>,
}

impl TryFrom<PlanDocument> for Plan {
    type Error = PlanError;

    fn try_from(doc: PlanDocument) -> Result<Self, Self::Error> {
        let mut plan = Plan::from_steps(doc.steps)?;
        plan.parallel_groups = doc.parallel_groups;
        plan.required = doc.required;
        Ok(plan)
    }
}

/// 步骤以列表形式序列化
fn serialize_steps<S: serde::Serializer>(
    steps: &BTreeMap<StepId, Step>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(steps.values())
}

/// 超时以秒（可为小数）表示
mod duration_secs_opt {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(deserializer)?;
        secs.filter(|s| s.is_finite() && *s > 0.0)
            .map(|s| Duration::try_from_secs_f64(s).map_err(D::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_steps_rejects_duplicate() {
        let err = Plan::from_steps(vec![Step::new(1, "a"), Step::new(1, "b")]).unwrap_err();
        assert_eq!(err, PlanError::DuplicateStep(StepId(1)));
    }

    #[test]
    fn test_from_json_parses_plan() {
        let plan = Plan::from_json(
            r#"{
                "steps": [
                    {"id": 1, "kind": "search", "inputs": {"query": "q"}},
                    {"id": 2, "kind": "summarize", "depends_on": [1], "priority": "high", "timeout": 1.5}
                ],
                "required": [2]
            }"#,
        )
        .unwrap();
        assert_eq!(plan.len(), 2);
        let second = plan.get(StepId(2)).unwrap();
        assert_eq!(second.priority, StepPriority::High);
        assert_eq!(second.timeout, Some(Duration::from_millis(1500)));
        assert!(second.depends_on.contains(&StepId(1)));
        assert!(plan.is_required(StepId(2)));
        assert_eq!(plan.get(StepId(1)).unwrap().status, StepStatus::Pending);
    }

    #[test]
    fn test_from_json_duplicate_id() {
        let err = Plan::from_json(r#"{"steps": [{"id": 3, "kind": "a"}, {"id": 3, "kind": "b"}]}"#)
            .unwrap_err();
        assert_eq!(err, PlanError::DuplicateStep(StepId(3)));
    }

    #[test]
    fn test_from_json_timeout_out_of_range() {
        let err = Plan::from_json(r#"{"steps": [{"id": 1, "kind": "echo", "timeout": 1e30}]}"#)
            .unwrap_err();
        assert!(matches!(err, PlanError::Malformed(_)));
    }

    #[test]
    fn test_deserialize_plan_value_rejects_duplicate() {
        let value = serde_json::json!({"steps": [{"id": 2, "kind": "a"}, {"id": 2, "kind": "b"}]});
        let err = serde_json::from_value::<Plan>(value).unwrap_err();
        assert!(err.to_string().contains("Duplicate step id #2"));
    }

    #[test]
    fn test_next_step_id_exhausted() {
        let plan = Plan::from_steps(vec![Step::new(u64::MAX, "echo")]).unwrap();
        assert_eq!(plan.next_step_id(), None);
        assert_eq!(Plan::default().next_step_id(), Some(StepId(1)));
    }

    #[test]
    fn test_transitive_dependents() {
        let plan = Plan::from_steps(vec![
            Step::new(1, "a"),
            Step::new(2, "b").depends_on([1]),
            Step::new(3, "c").depends_on([2]),
            Step::new(4, "d"),
        ])
        .unwrap();
        let deps: Vec<_> = plan.transitive_dependents(StepId(1)).into_iter().collect();
        assert_eq!(deps, vec![StepId(2), StepId(3)]);
        assert_eq!(plan.next_step_id(), Some(StepId(5)));
    }

    #[test]
    fn test_resolve_defaults_keeps_explicit_values() {
        let mut plan = Plan::from_steps(vec![
            Step::new(1, "a").with_max_attempts(1),
            Step::new(2, "b"),
        ])
        .unwrap();
        let engine = EngineSection::default();
        plan.resolve_defaults(&engine);
        assert_eq!(plan.get(StepId(1)).unwrap().max_attempts, Some(1));
        assert_eq!(plan.get(StepId(2)).unwrap().max_attempts, Some(engine.default_max_attempts));
        assert!(plan.get(StepId(2)).unwrap().timeout.is_some());
    }
}
