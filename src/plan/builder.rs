//! 计划构建器
//!
//! 提供流畅的 API 来构建计划（测试与嵌入方使用；Planner 走 JSON）

use std::collections::{BTreeMap, BTreeSet};

use crate::plan::types::*;

/// 计划构建器
#[derive(Default)]
pub struct PlanBuilder {
    steps: BTreeMap<StepId, Step>,
    parallel_groups: Vec<BTreeSet<StepId>>,
    required: BTreeSet<StepId>,
    duplicate: Option<StepId>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加步骤
    pub fn step(mut self, step: Step) -> Self {
        let id = step.id;
        if self.steps.insert(id, step).is_some() && self.duplicate.is_none() {
            self.duplicate = Some(id);
        }
        self
    }

    /// 设置顺序依赖：to 在 from 之后执行
    pub fn sequential(mut self, from: impl Into<StepId>, to: impl Into<StepId>) -> Self {
        let to = to.into();
        if let Some(step) = self.steps.get_mut(&to) {
            step.depends_on.insert(from.into());
        }
        self
    }

    /// 设置 AND 依赖（所有前置步骤）
    pub fn depends_on_all(
        mut self,
        step_id: impl Into<StepId>,
        deps: impl IntoIterator<Item = impl Into<StepId>>,
    ) -> Self {
        let id = step_id.into();
        if let Some(step) = self.steps.get_mut(&id) {
            step.depends_on.extend(deps.into_iter().map(Into::into));
        }
        self
    }

    /// 标注为必需步骤
    pub fn required(mut self, step_id: impl Into<StepId>) -> Self {
        self.required.insert(step_id.into());
        self
    }

    /// 并行分组提示
    pub fn parallel_group(mut self, ids: impl IntoIterator<Item = impl Into<StepId>>) -> Self {
        self.parallel_groups
            .push(ids.into_iter().map(Into::into).collect());
        self
    }

    /// 构建计划（仅检查重复 ID；依赖与环在调度器加载时校验）
    pub fn build(self) -> Result<Plan, PlanError> {
        if let Some(id) = self.duplicate {
            return Err(PlanError::DuplicateStep(id));
        }
        Ok(Plan {
            steps: self.steps,
            parallel_groups: self.parallel_groups,
            required: self.required,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_simple_plan() {
        let plan = PlanBuilder::new()
            .step(Step::new(1, "search"))
            .step(Step::new(2, "summarize"))
            .sequential(1, 2)
            .required(2)
            .build()
            .expect("Failed to build plan");

        assert_eq!(plan.len(), 2);
        assert!(plan.get(StepId(2)).unwrap().depends_on.contains(&StepId(1)));
        assert!(plan.is_required(StepId(2)));
    }

    #[test]
    fn test_build_with_duplicate_fails() {
        let result = PlanBuilder::new()
            .step(Step::new(1, "a"))
            .step(Step::new(1, "b"))
            .build();

        assert_eq!(result, Err(PlanError::DuplicateStep(StepId(1))));
    }
}
