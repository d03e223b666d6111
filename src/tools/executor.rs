//! 工具执行器
//!
//! 包装任意 ToolGateway，对每次调用施加超时并输出结构化审计日志（JSON）；
//! 超时转为 ToolError { kind: "timeout" }。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::timeout;

use crate::tools::{ToolError, ToolGateway};

/// 参数预览最大字符数
const ARGS_PREVIEW_CHARS: usize = 200;

/// 工具执行器：超时 + 审计，自身也是 ToolGateway
pub struct ToolExecutor {
    inner: Arc<dyn ToolGateway>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(inner: Arc<dyn ToolGateway>, timeout_secs: u64) -> Self {
        Self {
            inner,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub fn with_timeout(inner: Arc<dyn ToolGateway>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl ToolGateway for ToolExecutor {
    async fn invoke(&self, tool_id: &str, args: Value) -> Result<Value, ToolError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, self.inner.invoke(tool_id, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_id,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(inner) => inner,
            Err(_) => Err(ToolError::new(
                "timeout",
                format!("{} did not respond within {:?}", tool_id, self.timeout),
            )),
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{EchoTool, ToolRegistry};

    struct SlowGateway;

    #[async_trait]
    impl ToolGateway for SlowGateway {
        async fn invoke(&self, _tool_id: &str, _args: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_executor_passes_through() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let executor = ToolExecutor::new(Arc::new(registry), 5);
        let out = executor
            .invoke("echo", serde_json::json!({"text": "ok"}))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!("ok"));
    }

    #[tokio::test]
    async fn test_executor_times_out() {
        let executor = ToolExecutor::with_timeout(Arc::new(SlowGateway), Duration::from_millis(20));
        let err = executor.invoke("slow", Value::Null).await.unwrap_err();
        assert_eq!(err.kind, "timeout");
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = serde_json::json!({ "text": "x".repeat(500) });
        let preview = args_preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), ARGS_PREVIEW_CHARS + 3);
    }
}
