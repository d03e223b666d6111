//! 计划层：步骤 / 计划数据模型、依赖图校验、构建器与修订补丁

pub mod builder;
pub mod graph;
pub mod patch;
pub mod types;

pub use builder::PlanBuilder;
pub use graph::PlanGraph;
pub use patch::{PatchEffect, PatchTransition, PlanPatch, Substitution};
pub use types::*;
