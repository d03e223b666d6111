//! 恢复工具：为失败步骤收集补充上下文
//!
//! Reviser 插入的恢复步骤默认调用它。参数由恢复步骤的 inputs（failed_step / kind / reason / inputs）
//! 与上游依赖结果合并而来，返回整理后的上下文，供重试的原步骤通过依赖结果读取。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{Tool, ToolError};

/// 恢复工具（名称取自配置 reviser.recovery_kind）
pub struct RecoveryTool {
    name: String,
}

impl RecoveryTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Tool for RecoveryTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Gather supplementary context for a failed step. Args: {\"failed_step\": id, \"reason\": \"...\", \"inputs\": {...}}"
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let failed_step = args
            .get("failed_step")
            .and_then(Value::as_u64)
            .ok_or_else(|| ToolError::new("invalid_args", "Missing failed_step"))?;

        Ok(json!({
            "recovered_step": failed_step,
            "reason": args.get("reason").cloned().unwrap_or(Value::Null),
            "context": args.get("inputs").cloned().unwrap_or(Value::Null),
            "supplementary": args.get("dependencies").cloned().unwrap_or_else(|| json!({})),
        }))
    }
}
