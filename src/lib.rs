//! Hive - 基于 DAG 的多步骤执行引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **plan**: 步骤 / 计划数据模型、依赖图校验、构建器与修订补丁
//! - **core**: 状态存储、追踪、Executor 池、Reviser、调度器与 Aggregator
//! - **react**: 推理策略接口与 Think / Act / Observe 主循环
//! - **tools**: 工具网关（本地注册表 / 远程 HTTP）与审计执行器
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod observability;
pub mod plan;
pub mod react;
pub mod tools;

pub use crate::core::{EngineBuilder, ExecutionContext, Outcome, OutcomeStatus, Scheduler};
pub use crate::plan::{Plan, PlanBuilder, PlanError, Step, StepId, StepStatus};
