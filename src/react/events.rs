//! 推理过程事件：Think / Act / Observe
//!
//! 每个事件归属 (step, attempt, iteration, phase)；同一步骤内按 iteration 再按 phase 排序，写入后不可变。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::StepId;

/// 推理阶段（派生顺序即同一迭代内的事件顺序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracePhase {
    /// 策略选择下一动作
    Think,
    /// 调用工具
    Act,
    /// 工具返回（成功或错误）
    Observe,
}

impl TracePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Think => "think",
            Self::Act => "act",
            Self::Observe => "observe",
        }
    }
}

/// 单条追踪事件（可序列化为 JSON 供诊断展示）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub step_id: StepId,
    pub attempt: u32,
    pub iteration: usize,
    pub phase: TracePhase,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl TraceEvent {
    /// 排序键：(attempt, iteration, phase)
    pub fn position(&self) -> (u32, usize, TracePhase) {
        (self.attempt, self.iteration, self.phase)
    }
}
