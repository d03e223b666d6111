//! Echo 工具（本地运行与测试用）

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolError};

/// Echo 工具：回显 text 字段；无 text 时回显整个参数
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text (for testing). Args: {\"text\": \"message\"}"
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        match args.get("text") {
            Some(text) => Ok(text.clone()),
            None => Ok(args),
        }
    }
}
