//! 追踪记录器
//!
//! 每个步骤一条只追加的 TraceEvent 序列，可按步骤 / 尝试查询。记录无法关闭，
//! enable_tracing 只控制详细程度：关闭时负载中的长字符串截断为预览。
//! 步骤超时后其当前尝试被封存，之后该尝试的任何追加都会被拒绝。

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::TraceError;
use crate::plan::StepId;
use crate::react::{TraceEvent, TracePhase};

/// 非详细模式下负载字符串的预览长度
const PAYLOAD_PREVIEW_CHARS: usize = 200;
/// 推理链中每条事件的预览长度
const CHAIN_PREVIEW_CHARS: usize = 100;

/// 全部步骤的追踪副本（Aggregator 的输入之一）
pub type TraceSnapshot = BTreeMap<StepId, Vec<TraceEvent>>;

/// 推理摘要：事件计数与推理链预览
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReasoningSummary {
    pub total_events: usize,
    pub thoughts: usize,
    pub actions: usize,
    pub observations: usize,
    pub chain: Vec<String>,
}

#[derive(Debug, Default)]
struct TraceInner {
    events: BTreeMap<StepId, Vec<TraceEvent>>,
    sealed: BTreeSet<(StepId, u32)>,
}

/// 追踪记录器（每个请求一个实例）
#[derive(Debug)]
pub struct TraceRecorder {
    verbose: bool,
    inner: RwLock<TraceInner>,
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new(false)
    }
}

impl TraceRecorder {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            inner: RwLock::new(TraceInner::default()),
        }
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// 追加事件：已封存的尝试拒绝追加；同一步骤内 (attempt, iteration, phase) 必须严格递增
    pub async fn append(&self, mut event: TraceEvent) -> Result<(), TraceError> {
        if self.verbose {
            tracing::debug!(
                step = %event.step_id,
                attempt = event.attempt,
                iteration = event.iteration,
                phase = event.phase.as_str(),
                payload = %event.payload,
                "trace"
            );
        } else {
            truncate_strings(&mut event.payload, PAYLOAD_PREVIEW_CHARS);
        }

        let mut inner = self.inner.write().await;
        if inner.sealed.contains(&(event.step_id, event.attempt)) {
            return Err(TraceError::Sealed {
                step: event.step_id,
                attempt: event.attempt,
            });
        }
        let events = inner.events.entry(event.step_id).or_default();
        if let Some(last) = events.last() {
            if last.position() >= event.position() {
                return Err(TraceError::OutOfOrder {
                    step: event.step_id,
                    attempt: event.attempt,
                    iteration: event.iteration,
                    phase: event.phase,
                    last: last.position(),
                });
            }
        }
        events.push(event);
        Ok(())
    }

    /// 以当前时间构造事件并追加
    pub async fn record(
        &self,
        step_id: StepId,
        attempt: u32,
        iteration: usize,
        phase: TracePhase,
        payload: Value,
    ) -> Result<(), TraceError> {
        self.append(TraceEvent {
            step_id,
            attempt,
            iteration,
            phase,
            timestamp: Utc::now(),
            payload,
        })
        .await
    }

    /// 封存某次尝试：取消信号发出后调用
    pub async fn seal_attempt(&self, step_id: StepId, attempt: u32) {
        self.inner.write().await.sealed.insert((step_id, attempt));
    }

    pub async fn is_sealed(&self, step_id: StepId, attempt: u32) -> bool {
        self.inner.read().await.sealed.contains(&(step_id, attempt))
    }

    pub async fn events_for(&self, step_id: StepId) -> Vec<TraceEvent> {
        self.inner
            .read()
            .await
            .events
            .get(&step_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn events_for_attempt(&self, step_id: StepId, attempt: u32) -> Vec<TraceEvent> {
        self.events_for(step_id)
            .await
            .into_iter()
            .filter(|e| e.attempt == attempt)
            .collect()
    }

    pub async fn snapshot(&self) -> TraceSnapshot {
        self.inner.read().await.events.clone()
    }

    /// 推理摘要；step 为 None 时汇总全部步骤
    pub async fn reasoning_summary(&self, step_id: Option<StepId>) -> ReasoningSummary {
        let inner = self.inner.read().await;
        match step_id {
            Some(id) => summarize(inner.events.get(&id).into_iter().flatten()),
            None => summarize(inner.events.values().flatten()),
        }
    }
}

/// 由事件序列推导推理摘要（纯函数）
pub fn summarize<'a>(events: impl IntoIterator<Item = &'a TraceEvent>) -> ReasoningSummary {
    let mut summary = ReasoningSummary::default();
    for event in events {
        summary.total_events += 1;
        match event.phase {
            TracePhase::Think => summary.thoughts += 1,
            TracePhase::Act => summary.actions += 1,
            TracePhase::Observe => summary.observations += 1,
        }
        summary.chain.push(format!(
            "[{} a{} i{} {}] {}",
            event.step_id,
            event.attempt,
            event.iteration,
            event.phase.as_str(),
            preview(&event.payload.to_string(), CHAIN_PREVIEW_CHARS)
        ));
    }
    summary
}

pub(crate) fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 递归截断负载中的长字符串，保留结构（kind 等字段仍可读）
fn truncate_strings(value: &mut Value, max_chars: usize) {
    match value {
        Value::String(s) if s.chars().count() > max_chars => {
            *s = preview(s, max_chars);
        }
        Value::Array(items) => items.iter_mut().for_each(|v| truncate_strings(v, max_chars)),
        Value::Object(map) => map.values_mut().for_each(|v| truncate_strings(v, max_chars)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_enforces_order() {
        let trace = TraceRecorder::new(true);
        let id = StepId(1);
        trace.record(id, 1, 0, TracePhase::Think, Value::Null).await.unwrap();
        trace.record(id, 1, 0, TracePhase::Act, Value::Null).await.unwrap();
        let err = trace
            .record(id, 1, 0, TracePhase::Think, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, TraceError::OutOfOrder { .. }));
        trace.record(id, 1, 1, TracePhase::Think, Value::Null).await.unwrap();
        trace.record(id, 2, 0, TracePhase::Think, Value::Null).await.unwrap();
        assert_eq!(trace.events_for(id).await.len(), 4);
        assert_eq!(trace.events_for_attempt(id, 1).await.len(), 3);
    }

    #[tokio::test]
    async fn test_sealed_attempt_rejects_appends() {
        let trace = TraceRecorder::default();
        let id = StepId(5);
        trace.record(id, 1, 0, TracePhase::Think, Value::Null).await.unwrap();
        trace.seal_attempt(id, 1).await;
        let err = trace
            .record(id, 1, 0, TracePhase::Act, Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err, TraceError::Sealed { step: id, attempt: 1 });
        // 新的尝试不受影响
        trace.record(id, 2, 0, TracePhase::Think, Value::Null).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_verbose_truncates_payload_strings() {
        let trace = TraceRecorder::new(false);
        let long = "x".repeat(500);
        trace
            .record(
                StepId(1),
                1,
                0,
                TracePhase::Observe,
                serde_json::json!({"kind": "remote", "output": long}),
            )
            .await
            .unwrap();
        let events = trace.events_for(StepId(1)).await;
        let output = events[0].payload["output"].as_str().unwrap();
        assert_eq!(output.chars().count(), PAYLOAD_PREVIEW_CHARS + 3);
        assert_eq!(events[0].payload["kind"], "remote");
    }

    #[tokio::test]
    async fn test_reasoning_summary_counts_and_chain() {
        let trace = TraceRecorder::new(true);
        trace
            .record(StepId(1), 1, 0, TracePhase::Think, serde_json::json!("y".repeat(300)))
            .await
            .unwrap();
        trace.record(StepId(1), 1, 0, TracePhase::Act, Value::Null).await.unwrap();
        trace.record(StepId(2), 1, 0, TracePhase::Observe, Value::Null).await.unwrap();

        let all = trace.reasoning_summary(None).await;
        assert_eq!(all.total_events, 3);
        assert_eq!((all.thoughts, all.actions, all.observations), (1, 1, 1));
        assert!(all.chain[0].ends_with("..."));

        let one = trace.reasoning_summary(Some(StepId(2))).await;
        assert_eq!(one.total_events, 1);
        assert!(one.chain[0].starts_with("[#2 a1 i0 observe]"));
    }
}
