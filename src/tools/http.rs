//! 远程工具网关
//!
//! 工具服务约定：POST {base_url}/tools/{tool}，请求体为 JSON 参数；
//! 200 且响应体无 "error" 字段即为结果，其余情况映射为 ToolError。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::HttpSection;
use crate::tools::{ToolError, ToolGateway};

/// 基于 reqwest 的远程工具网关
pub struct HttpToolGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpToolGateway {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// 从 [tools.http] 配置创建；未配置 base_url 时返回 None
    pub fn from_config(section: &HttpSection) -> Option<Result<Self, reqwest::Error>> {
        section
            .base_url
            .as_ref()
            .map(|url| Self::new(url.clone(), section.timeout_secs))
    }

    fn tool_url(&self, tool_id: &str) -> String {
        format!("{}/tools/{}", self.base_url, tool_id)
    }
}

#[async_trait]
impl ToolGateway for HttpToolGateway {
    async fn invoke(&self, tool_id: &str, args: Value) -> Result<Value, ToolError> {
        let response = self
            .client
            .post(self.tool_url(tool_id))
            .json(&args)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() { "timeout" } else { "transport" };
                ToolError::new(kind, e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let kind = if status == reqwest::StatusCode::NOT_FOUND {
                "not_found".to_string()
            } else {
                format!("http_{}", status.as_u16())
            };
            return Err(ToolError::new(kind, format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::new("decode", e.to_string()))?;

        match body.get("error") {
            Some(err) if !err.is_null() => {
                let message = err
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string());
                Err(ToolError::new("remote", message))
            }
            _ => Ok(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_gateway_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/tools/search_documents")
            .match_body(mockito::Matcher::Json(serde_json::json!({"query": "q", "top_k": 5})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"results": [{"content": "doc"}]}"#)
            .create_async()
            .await;

        let gateway = HttpToolGateway::new(server.url(), 5).unwrap();
        let out = gateway
            .invoke("search_documents", serde_json::json!({"query": "q", "top_k": 5}))
            .await
            .unwrap();
        assert_eq!(out["results"][0]["content"], "doc");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_gateway_error_field() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/tools/format_slide")
            .with_status(200)
            .with_body(r#"{"error": "formatter crashed"}"#)
            .create_async()
            .await;

        let gateway = HttpToolGateway::new(format!("{}/", server.url()), 5).unwrap();
        let err = gateway.invoke("format_slide", Value::Null).await.unwrap_err();
        assert_eq!(err.kind, "remote");
        assert_eq!(err.message, "formatter crashed");
    }

    #[tokio::test]
    async fn test_http_gateway_status_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/tools/summarize_report")
            .with_status(503)
            .with_body("busy")
            .create_async()
            .await;

        let gateway = HttpToolGateway::new(server.url(), 5).unwrap();
        let err = gateway.invoke("summarize_report", Value::Null).await.unwrap_err();
        assert_eq!(err.kind, "http_503");
    }
}
