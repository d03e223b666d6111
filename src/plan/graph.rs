//! 计划依赖图
//!
//! 使用邻接表和入度表实现 DAG 拓扑排序；加载时以及每次合并修订补丁后都用它做无环校验。

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::plan::types::*;

/// 计划依赖图
pub struct PlanGraph {
    /// 邻接表：步骤 ID -> 依赖该步骤的步骤列表
    pub adjacency: BTreeMap<StepId, Vec<StepId>>,
    /// 入度表：步骤 ID -> 依赖数
    pub in_degree: BTreeMap<StepId, usize>,
}

impl PlanGraph {
    /// 创建依赖图；引用不存在的步骤时报 UnknownDependency
    pub fn new(plan: &Plan) -> Result<Self, PlanError> {
        let mut adjacency: BTreeMap<StepId, Vec<StepId>> = BTreeMap::new();
        let mut in_degree: BTreeMap<StepId, usize> = BTreeMap::new();

        for id in plan.steps.keys() {
            in_degree.insert(*id, 0);
            adjacency.insert(*id, Vec::new());
        }

        for (id, step) in &plan.steps {
            for dep in &step.depends_on {
                if !plan.steps.contains_key(dep) {
                    return Err(PlanError::UnknownDependency {
                        step: *id,
                        missing: *dep,
                    });
                }
                adjacency.entry(*dep).or_default().push(*id);
                *in_degree.entry(*id).or_insert(0) += 1;
            }
        }

        Ok(Self { adjacency, in_degree })
    }

    /// Kahn 拓扑排序；有环时返回环上（及被环阻塞）的步骤
    pub fn topological_order(&self) -> Result<Vec<StepId>, PlanError> {
        let mut degree = self.in_degree.clone();
        let mut queue: VecDeque<StepId> = degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(degree.len());

        while let Some(id) = queue.pop_front() {
            order.push(id);
            if let Some(dependents) = self.adjacency.get(&id) {
                for dependent in dependents {
                    if let Some(d) = degree.get_mut(dependent) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(*dependent);
                        }
                    }
                }
            }
        }

        if order.len() == degree.len() {
            Ok(order)
        } else {
            let ordered: BTreeSet<StepId> = order.into_iter().collect();
            let stuck = degree
                .keys()
                .filter(|id| !ordered.contains(id))
                .copied()
                .collect();
            Err(PlanError::CyclicDependency(stuck))
        }
    }
}

impl Plan {
    /// 加载时校验：未知依赖、环
    pub fn validate(&self) -> Result<(), PlanError> {
        for (key, step) in &self.steps {
            if *key != step.id {
                return Err(PlanError::Malformed(format!(
                    "step keyed as {} carries id {}",
                    key, step.id
                )));
            }
        }
        PlanGraph::new(self)?.topological_order().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(steps: Vec<Step>) -> Plan {
        Plan::from_steps(steps).unwrap()
    }

    #[test]
    fn test_graph_construction() {
        let p = plan(vec![Step::new(1, "a"), Step::new(2, "b").depends_on([1])]);
        let graph = PlanGraph::new(&p).unwrap();
        assert_eq!(graph.in_degree.get(&StepId(1)), Some(&0));
        assert_eq!(graph.in_degree.get(&StepId(2)), Some(&1));
        assert_eq!(graph.adjacency.get(&StepId(1)), Some(&vec![StepId(2)]));
    }

    #[test]
    fn test_cycle_rejected() {
        let p = plan(vec![
            Step::new(1, "a").depends_on([2]),
            Step::new(2, "b").depends_on([1]),
            Step::new(3, "c"),
        ]);
        match p.validate() {
            Err(PlanError::CyclicDependency(ids)) => {
                assert_eq!(ids, vec![StepId(1), StepId(2)]);
            }
            other => panic!("Expected CyclicDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_self_loop_rejected() {
        let p = plan(vec![Step::new(1, "a").depends_on([1])]);
        assert!(matches!(p.validate(), Err(PlanError::CyclicDependency(_))));
    }

    #[test]
    fn test_unknown_dependency() {
        let p = plan(vec![Step::new(1, "a").depends_on([9])]);
        assert_eq!(
            p.validate(),
            Err(PlanError::UnknownDependency {
                step: StepId(1),
                missing: StepId(9)
            })
        );
    }

    #[test]
    fn test_topological_order_diamond() {
        let p = plan(vec![
            Step::new(1, "a"),
            Step::new(2, "b").depends_on([1]),
            Step::new(3, "c").depends_on([1]),
            Step::new(4, "d").depends_on([2, 3]),
        ]);
        let order = PlanGraph::new(&p).unwrap().topological_order().unwrap();
        assert_eq!(order.first(), Some(&StepId(1)));
        assert_eq!(order.last(), Some(&StepId(4)));
    }
}
