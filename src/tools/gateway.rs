//! 工具网关：引擎调用外部工具的统一入口
//!
//! invoke(tool_id, args) -> 结果 | ToolError；网关内部不做重试，重试由调度器 / Reviser 决定。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 工具网关返回的错误负载
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ToolError {
    /// 错误类别（not_found / timeout / transport / http_500 / insufficient_data ...）
    pub kind: String,
    pub message: String,
    /// 可恢复：作为观察结果交回推理策略，不结束本次尝试
    #[serde(default)]
    pub recoverable: bool,
}

impl ToolError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            recoverable: false,
        }
    }

    /// 标记为可恢复
    pub fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }

    pub fn not_found(tool_id: &str) -> Self {
        Self::new("not_found", format!("Unknown tool: {tool_id}"))
    }
}

/// 工具网关 trait：对引擎不透明
#[async_trait]
pub trait ToolGateway: Send + Sync {
    async fn invoke(&self, tool_id: &str, args: Value) -> Result<Value, ToolError>;
}
