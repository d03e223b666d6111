//! 调度器：请求主控循环
//!
//! 独占计划拓扑与状态迁移。循环直到没有 Pending / Ready / Running 步骤：
//! 计算就绪集 -> 按优先级（同级取最小 ID）派发到池 -> 等待至少一个完成事件 ->
//! 成功则发布结果；失败则交给 Reviser 合并补丁，无补丁时终态失败并级联跳过下游。
//! 每个状态迁移都先写入计划，再同步写入 StateStore。

use std::cmp::Reverse;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;

use crate::config::{AppConfig, EngineSection};
use crate::core::aggregator::{aggregate, Outcome};
use crate::core::pool::{ExecutorPool, StepHandle};
use crate::core::reviser::{DefaultRevisionPolicy, Revision, RevisionPolicy, Reviser};
use crate::core::state::result_key;
use crate::core::{ExecutionContext, FailureReason, SkipReason};
use crate::plan::{PatchTransition, Plan, PlanError, StepId, StepStatus};
use crate::react::{Executor, ReasoningPolicy, StepOutcome};
use crate::tools::ToolGateway;

/// 调度器（可复用：每次 run 对应一个请求）
pub struct Scheduler {
    engine: EngineSection,
    executor: Arc<Executor>,
    revision_policy: Arc<dyn RevisionPolicy>,
}

impl Scheduler {
    pub fn new(
        config: &AppConfig,
        gateway: Arc<dyn ToolGateway>,
        policy: Arc<dyn ReasoningPolicy>,
    ) -> Self {
        let executor = Executor::new(gateway, policy, config.engine.max_iterations_per_step);
        Self {
            engine: config.engine.clone(),
            executor: Arc::new(executor),
            revision_policy: Arc::new(DefaultRevisionPolicy::new(config.reviser.clone())),
        }
    }

    /// 替换修订策略
    pub fn with_revision_policy(self, policy: impl RevisionPolicy + 'static) -> Self {
        self.with_shared_revision_policy(Arc::new(policy))
    }

    pub fn with_shared_revision_policy(mut self, policy: Arc<dyn RevisionPolicy>) -> Self {
        self.revision_policy = policy;
        self
    }

    pub fn engine(&self) -> &EngineSection {
        &self.engine
    }

    /// 以新的执行上下文运行计划
    pub async fn run(&self, plan: Plan) -> Result<Outcome, PlanError> {
        self.run_in(plan, ExecutionContext::with_tracing(self.engine.enable_tracing))
            .await
    }

    /// 在给定上下文中运行计划（调用方持有 ctx 可随时 abort，并在结束后检查状态与追踪）
    pub async fn run_in(&self, plan: Plan, ctx: ExecutionContext) -> Result<Outcome, PlanError> {
        let mut plan = self.load(plan)?;
        let pool = ExecutorPool::new(self.engine.pool_capacity, Arc::clone(&self.executor));
        let mut reviser = Reviser::new(Arc::clone(&self.revision_policy), self.engine.max_revisions);

        tracing::info!(
            request = %ctx.request_id(),
            steps = plan.len(),
            required = plan.required.len(),
            capacity = pool.capacity(),
            "plan loaded"
        );

        for id in plan.steps.keys().copied().collect::<Vec<_>>() {
            ctx.state().set_status(id, StepStatus::Pending).await;
        }

        let mut run = RunState {
            plan: &mut plan,
            ctx: &ctx,
            engine: &self.engine,
            in_flight: FuturesUnordered::new(),
            recovery_steps: BTreeSet::new(),
            aborted: false,
        };

        loop {
            if ctx.is_aborted() && !run.aborted {
                run.abort().await;
            }
            if !run.aborted {
                run.promote_ready().await;
                run.dispatch(&pool).await;
            }

            if run.in_flight.is_empty() {
                if !run.plan.is_settled() {
                    // 兜底：无在途步骤却仍有未终态步骤，按中止收尾以保证终止
                    run.abort().await;
                }
                break;
            }

            // 中止优先：子令牌随中止一起触发，完成事件不能抢在中止处理之前
            tokio::select! {
                biased;
                _ = ctx.abort().cancelled(), if !run.aborted => {}
                Some(outcome) = run.in_flight.next() => {
                    run.complete(outcome, &mut reviser).await;
                }
            }
        }
        drop(run);

        let state = ctx.state().snapshot().await;
        let trace = ctx.trace().snapshot().await;
        let outcome = aggregate(&plan, &state, &trace, reviser.records());
        tracing::info!(
            request = %outcome.request_id,
            status = ?outcome.status,
            succeeded = outcome.summary.succeeded,
            failed = outcome.summary.failed,
            skipped = outcome.summary.skipped,
            revisions = outcome.summary.revisions,
            "request finished"
        );
        Ok(outcome)
    }

    /// 加载期检查：无环、依赖存在；补全默认值并重置运行期字段
    fn load(&self, mut plan: Plan) -> Result<Plan, PlanError> {
        plan.validate()?;
        plan.resolve_defaults(&self.engine);
        for step in plan.steps.values_mut() {
            step.status = StepStatus::Pending;
            step.attempt = 0;
            step.result = None;
        }

        let known: BTreeSet<StepId> = plan.steps.keys().copied().collect();
        for (index, group) in plan.parallel_groups.iter().enumerate() {
            let unknown: Vec<StepId> = group.difference(&known).copied().collect();
            if !unknown.is_empty() {
                tracing::warn!(group = index, ?unknown, "parallel group references unknown steps, ignored");
            }
        }
        Ok(plan)
    }
}

/// 单次运行的可变状态
struct RunState<'a> {
    plan: &'a mut Plan,
    ctx: &'a ExecutionContext,
    engine: &'a EngineSection,
    in_flight: FuturesUnordered<StepHandle>,
    /// 修订插入的恢复步骤：终态失败时从依赖方摘除，而不是级联
    recovery_steps: BTreeSet<StepId>,
    aborted: bool,
}

impl RunState<'_> {
    /// 计划与 StateStore 同步迁移
    async fn transition(&mut self, id: StepId, to: StepStatus) {
        if let Some(step) = self.plan.get_mut(id) {
            step.status = to;
        }
        self.ctx.state().set_status(id, to).await;
    }

    /// Pending 且所有依赖已成功 / 跳过 -> Ready
    async fn promote_ready(&mut self) {
        let ready: Vec<StepId> = self
            .plan
            .steps
            .values()
            .filter(|s| s.status == StepStatus::Pending)
            .filter(|s| {
                s.depends_on.iter().all(|d| {
                    self.plan
                        .get(*d)
                        .map(|dep| dep.status.satisfies_dependents())
                        .unwrap_or(false)
                })
            })
            .map(|s| s.id)
            .collect();
        for id in ready {
            self.transition(id, StepStatus::Ready).await;
        }
    }

    /// 池有空位时按 (优先级降序, ID 升序) 派发 Ready 步骤
    async fn dispatch(&mut self, pool: &ExecutorPool) {
        let mut ready: Vec<_> = self
            .plan
            .steps
            .values()
            .filter(|s| s.status == StepStatus::Ready)
            .map(|s| (Reverse(s.priority), s.id))
            .collect();
        ready.sort();

        for (_, id) in ready {
            if self.in_flight.len() >= pool.capacity() {
                break;
            }
            self.transition(id, StepStatus::Running).await;
            let Some(step) = self.plan.get_mut(id) else {
                continue;
            };
            if step.attempt == 0 {
                step.attempt = 1;
            }
            let step = step.clone();
            tracing::info!(
                step = %id,
                kind = %step.kind,
                attempt = step.attempt,
                priority = ?step.priority,
                "step dispatched"
            );
            let cancel = self.ctx.abort().child_token();
            self.in_flight.push(pool.submit(step, self.ctx.clone(), cancel));
        }
    }

    async fn complete(&mut self, outcome: StepOutcome, reviser: &mut Reviser) {
        if self.ctx.is_aborted() && !self.aborted {
            self.abort().await;
        }
        let id = outcome.step_id;
        match outcome.result {
            Ok(result) => self.succeed(id, result).await,
            Err(reason) => self.fail(id, reason, reviser).await,
        }
    }

    async fn succeed(&mut self, id: StepId, result: Value) {
        if let Some(step) = self.plan.get_mut(id) {
            step.result = Some(result.clone());
        }
        let state = self.ctx.state();
        state.set_result(id, result.clone()).await;
        state.put_shared(result_key(id), result).await;
        self.transition(id, StepStatus::Succeeded).await;
        tracing::info!(step = %id, "step succeeded");
    }

    async fn fail(&mut self, id: StepId, reason: FailureReason, reviser: &mut Reviser) {
        self.transition(id, StepStatus::Failed).await;
        self.ctx.state().set_failure(id, reason.clone()).await;
        tracing::warn!(step = %id, reason = %reason, "step failed");

        if self.aborted || matches!(reason, FailureReason::Cancelled) {
            self.settle_failed(id).await;
            return;
        }

        let history = self.ctx.trace().events_for(id).await;
        match reviser.revise(self.plan, id, &reason, &history) {
            Revision::Applied(effect) => {
                self.plan.resolve_defaults(self.engine);
                for inserted in &effect.inserted {
                    self.ctx.state().set_status(*inserted, StepStatus::Pending).await;
                }
                let replacement = match &effect.transition {
                    PatchTransition::Supersede { replacement, .. } => Some(*replacement),
                    _ => None,
                };
                self.recovery_steps.extend(
                    effect
                        .inserted
                        .iter()
                        .copied()
                        .filter(|id| Some(*id) != replacement),
                );
                match effect.transition {
                    PatchTransition::Requeue(target) => {
                        if let Some(step) = self.plan.get_mut(target) {
                            step.attempt += 1;
                        }
                        self.transition(target, StepStatus::Pending).await;
                    }
                    PatchTransition::Supersede { target, replacement } => {
                        self.ctx.state().set_superseded(target, replacement).await;
                        tracing::info!(step = %target, replacement = %replacement, "step superseded");
                    }
                    PatchTransition::Skip { target, reason } => {
                        self.transition(target, StepStatus::Skipped).await;
                        self.ctx
                            .state()
                            .set_skip(target, SkipReason::Revised { reason })
                            .await;
                    }
                }
            }
            Revision::Unrecoverable => {
                let attempts = self.plan.get(id).map(|s| s.attempt).unwrap_or(0);
                self.ctx
                    .state()
                    .set_failure(
                        id,
                        FailureReason::Unrecoverable {
                            attempts,
                            last: Box::new(reason),
                        },
                    )
                    .await;
                self.settle_failed(id).await;
            }
        }
    }

    /// 终态失败后的收尾：恢复步骤摘除，其余级联
    async fn settle_failed(&mut self, id: StepId) {
        if self.recovery_steps.contains(&id) {
            self.detach(id);
        } else {
            self.cascade(id).await;
        }
    }

    /// 恢复步骤终态失败：从依赖它的步骤上摘除，被恢复的步骤照常重试
    fn detach(&mut self, recovery: StepId) {
        for dependent in self.plan.dependents_of(recovery) {
            if let Some(step) = self.plan.get_mut(dependent) {
                step.depends_on.remove(&recovery);
            }
            tracing::warn!(step = %dependent, recovery = %recovery, "recovery step failed, detached");
        }
    }

    /// 把终态失败步骤的全部下游（未终态者）标记为 Skipped；原因指向其上游
    async fn cascade(&mut self, failed: StepId) {
        let mut queue: VecDeque<(StepId, StepId)> = self
            .plan
            .dependents_of(failed)
            .into_iter()
            .map(|d| (failed, d))
            .collect();
        while let Some((upstream, id)) = queue.pop_front() {
            let active = self.plan.get(id).map(|s| s.status.is_active()).unwrap_or(false);
            if !active {
                continue;
            }
            self.transition(id, StepStatus::Skipped).await;
            self.ctx
                .state()
                .set_skip(id, SkipReason::DependencyFailed { dependency: upstream })
                .await;
            tracing::warn!(step = %id, dependency = %upstream, "step skipped, dependency did not succeed");
            queue.extend(self.plan.dependents_of(id).into_iter().map(|d| (id, d)));
        }
    }

    /// 请求中止：未开始的步骤跳过，运行中的步骤由子令牌取消
    async fn abort(&mut self) {
        self.aborted = true;
        let waiting: Vec<StepId> = self
            .plan
            .steps
            .values()
            .filter(|s| matches!(s.status, StepStatus::Pending | StepStatus::Ready))
            .map(|s| s.id)
            .collect();
        tracing::warn!(
            request = %self.ctx.request_id(),
            waiting = waiting.len(),
            running = self.in_flight.len(),
            "request aborted"
        );
        for id in waiting {
            self.transition(id, StepStatus::Skipped).await;
            self.ctx.state().set_skip(id, SkipReason::Aborted).await;
        }
    }
}
