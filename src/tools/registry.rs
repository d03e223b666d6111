//! 工具注册表
//!
//! 本地工具实现 Tool trait（name / description / execute），由 ToolRegistry 按名注册与查找；
//! ToolRegistry 本身即是一个 ToolGateway。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{ToolError, ToolGateway};

/// 工具 trait：名称、描述、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（即步骤动作中的 tool_id）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 返回 (name, description) 列表
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.description().to_string()))
            .collect()
    }
}

#[async_trait]
impl ToolGateway for ToolRegistry {
    async fn invoke(&self, tool_id: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(tool_id)
            .ok_or_else(|| ToolError::not_found(tool_id))?;
        tool.execute(args).await
    }
}
