//! 引擎构建器：统一的调度器初始化逻辑
//!
//! 按配置选择工具网关（配置了 tools.http.base_url 时走远程 HTTP 网关，否则使用本地注册表），
//! 外面再包一层带超时与审计日志的 ToolExecutor。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::reviser::RevisionPolicy;
use crate::core::{EngineError, Scheduler};
use crate::react::{PlannedActionsPolicy, ReasoningPolicy};
use crate::tools::{
    EchoTool, HttpToolGateway, RecoveryTool, Tool, ToolExecutor, ToolGateway, ToolRegistry,
};

/// 引擎构建器
pub struct EngineBuilder {
    config: AppConfig,
    gateway: Option<Arc<dyn ToolGateway>>,
    policy: Option<Arc<dyn ReasoningPolicy>>,
    revision_policy: Option<Arc<dyn RevisionPolicy>>,
    local_tools: ToolRegistry,
}

impl EngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            gateway: None,
            policy: None,
            revision_policy: None,
            local_tools: ToolRegistry::new(),
        }
    }

    /// 覆盖并发上限
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.config.engine.pool_capacity = capacity.max(1);
        self
    }

    /// 直接指定工具网关（忽略 tools.http 配置）
    pub fn with_gateway(mut self, gateway: Arc<dyn ToolGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// 向本地注册表追加工具
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.local_tools.register(tool);
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn ReasoningPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_revision_policy(mut self, policy: Arc<dyn RevisionPolicy>) -> Self {
        self.revision_policy = Some(policy);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 本地注册表：内置 echo 与恢复工具 + 调用方追加的工具
    fn build_tool_registry(mut tools: ToolRegistry, recovery_kind: &str) -> ToolRegistry {
        if tools.get("echo").is_none() {
            tools.register(EchoTool);
        }
        if tools.get(recovery_kind).is_none() {
            tools.register(RecoveryTool::new(recovery_kind));
        }
        tools
    }

    fn build_gateway(&mut self) -> Result<Arc<dyn ToolGateway>, EngineError> {
        if let Some(gateway) = self.gateway.take() {
            return Ok(gateway);
        }
        match HttpToolGateway::from_config(&self.config.tools.http) {
            Some(http) => {
                let http = http.map_err(|e| EngineError::Gateway(e.to_string()))?;
                tracing::info!(base_url = ?self.config.tools.http.base_url, "using remote tool gateway");
                Ok(Arc::new(http))
            }
            None => {
                let registry = Self::build_tool_registry(
                    std::mem::take(&mut self.local_tools),
                    &self.config.reviser.recovery_kind,
                );
                tracing::info!(tools = ?registry.tool_names(), "using local tool registry");
                Ok(Arc::new(registry))
            }
        }
    }

    pub fn build(mut self) -> Result<Scheduler, EngineError> {
        let inner = self.build_gateway()?;
        let gateway: Arc<dyn ToolGateway> = Arc::new(ToolExecutor::new(
            inner,
            self.config.tools.call_timeout_secs,
        ));
        let policy = self
            .policy
            .take()
            .unwrap_or_else(|| Arc::new(PlannedActionsPolicy));

        let scheduler = Scheduler::new(&self.config, gateway, policy);
        Ok(match self.revision_policy {
            Some(revision_policy) => scheduler.with_shared_revision_policy(revision_policy),
            None => scheduler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::core::OutcomeStatus;
    use crate::plan::{Plan, Step, StepId, StepStatus};
    use crate::tools::ToolError;

    #[tokio::test]
    async fn test_builds_local_engine() {
        let scheduler = EngineBuilder::new(AppConfig::default())
            .with_pool_capacity(2)
            .build()
            .unwrap();
        assert_eq!(scheduler.engine().pool_capacity, 2);

        let plan = Plan::from_steps(vec![
            Step::new(1, "echo").with_inputs(serde_json::json!({"text": "hello"})),
        ])
        .unwrap();
        let outcome = scheduler.run(plan).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);
    }

    /// 首次调用报 insufficient_data，之后成功
    struct ThinOnce {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Tool for ThinOnce {
        fn name(&self) -> &str {
            "summarize_report"
        }

        fn description(&self) -> &str {
            "Fails once with insufficient_data"
        }

        async fn execute(&self, _args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ToolError::new("insufficient_data", "no documents"))
            } else {
                Ok(serde_json::json!("summary"))
            }
        }
    }

    #[tokio::test]
    async fn test_default_engine_serves_recovery_steps() {
        let scheduler = EngineBuilder::new(AppConfig::default())
            .with_tool(ThinOnce {
                calls: AtomicUsize::new(0),
            })
            .build()
            .unwrap();
        let plan = Plan::from_steps(vec![Step::new(1, "summarize_report").with_max_attempts(3)])
            .unwrap();
        let outcome = scheduler.run(plan).await.unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Success);
        let original = &outcome.steps[&StepId(1)];
        assert_eq!(original.status, StepStatus::Succeeded);
        assert_eq!(original.attempts, 2);
        let recovery = &outcome.steps[&StepId(2)];
        assert_eq!(recovery.kind, "recovery");
        assert_eq!(recovery.status, StepStatus::Succeeded);
        assert_eq!(recovery.result.as_ref().unwrap()["recovered_step"], 1);
    }

    #[tokio::test]
    async fn test_builds_http_engine() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/tools/search_documents")
            .with_status(200)
            .with_body(r#"{"results": []}"#)
            .create_async()
            .await;

        let mut config = AppConfig::default();
        config.tools.http.base_url = Some(server.url());
        let scheduler = EngineBuilder::new(config).build().unwrap();
        let plan = Plan::from_steps(vec![Step::new(1, "search_documents")]).unwrap();
        let outcome = scheduler.run(plan).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(
            outcome.steps[&StepId(1)].result,
            Some(serde_json::json!({"results": []}))
        );
    }
}
