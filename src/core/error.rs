//! 引擎错误类型与步骤失败 / 跳过原因
//!
//! 步骤级失败不会作为 Rust 错误逃出引擎：它们是 FailureReason / SkipReason 值，
//! 由调度器记录并最终进入 Outcome。对外唯一的错误是加载期的 PlanError 与构建期的 EngineError。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plan::{PlanError, StepId};
use crate::react::TracePhase;

/// 步骤失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// 工具网关返回不可恢复错误
    #[error("Tool {tool} failed ({kind}): {message}")]
    ToolError {
        tool: String,
        kind: String,
        message: String,
    },

    #[error("Step exceeded its timeout")]
    Timeout,

    /// 推理循环在上限内未得到 Done
    #[error("Reasoning loop hit the iteration limit ({limit})")]
    IterationLimitExceeded { limit: usize },

    /// 请求被外部中止
    #[error("Step was cancelled")]
    Cancelled,

    /// 推理策略自身出错
    #[error("Reasoning policy error: {message}")]
    PolicyError { message: String },

    /// 尝试耗尽且修订无补丁：终态失败
    #[error("Unrecoverable after {attempts} attempt(s): {last}")]
    Unrecoverable {
        attempts: u32,
        last: Box<FailureReason>,
    },
}

impl FailureReason {
    /// 原因代码（修订记录与日志用）
    pub fn code(&self) -> &'static str {
        match self {
            Self::ToolError { .. } => "tool_error",
            Self::Timeout => "timeout",
            Self::IterationLimitExceeded { .. } => "iteration_limit_exceeded",
            Self::Cancelled => "cancelled",
            Self::PolicyError { .. } => "policy_error",
            Self::Unrecoverable { .. } => "unrecoverable",
        }
    }

    /// 去掉 Unrecoverable 包装后的根因
    pub fn root(&self) -> &FailureReason {
        match self {
            Self::Unrecoverable { last, .. } => last.root(),
            other => other,
        }
    }
}

/// 步骤跳过原因（标签字段为 `skip`，Revised 自带 reason 字段）
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "skip", rename_all = "snake_case")]
pub enum SkipReason {
    /// 前置步骤终态失败（或已被级联跳过），本步骤从未运行
    #[error("Dependency {dependency} did not succeed")]
    DependencyFailed { dependency: StepId },

    /// Reviser 决定放弃该步骤，依赖方照常推进
    #[error("Skipped by revision: {reason}")]
    Revised { reason: String },

    /// 请求中止时尚未开始
    #[error("Request aborted before the step started")]
    Aborted,
}

/// 追踪记录错误：事件乱序或向已封存的尝试追加
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    #[error("Attempt {attempt} of step {step} is sealed")]
    Sealed { step: StepId, attempt: u32 },

    #[error("Out-of-order trace event for step {step}: ({attempt}, {iteration}, {phase:?}) after {last:?}")]
    OutOfOrder {
        step: StepId,
        attempt: u32,
        iteration: usize,
        phase: TracePhase,
        last: (u32, usize, TracePhase),
    },
}

/// 引擎构建 / 运行入口错误
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Tool gateway error: {0}")]
    Gateway(String),
}
