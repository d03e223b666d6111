//! 请求级状态存储
//!
//! 保存步骤状态、结果、失败 / 跳过原因，以及对请求内所有步骤可见的共享键值空间。
//! 所有写入经同一把 RwLock 串行化（每个键的写入因此全序），读取总能看到最新提交。
//! 状态迁移按提交顺序记入迁移日志，测试据此校验就绪与并发不变量。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::{FailureReason, SkipReason};
use crate::plan::{StepId, StepStatus};

/// 依赖结果在共享空间中的键
pub fn result_key(step_id: StepId) -> String {
    format!("result:{}", step_id.0)
}

/// 一次状态迁移（from 为 None 表示登记）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusTransition {
    pub seq: u64,
    pub step_id: StepId,
    pub from: Option<StepStatus>,
    pub to: StepStatus,
}

/// 共享空间条目
#[derive(Debug)]
struct SharedEntry {
    value: Value,
    /// 该键的提交次数
    version: u64,
    access_count: AtomicU64,
}

/// 共享条目快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SharedEntrySnapshot {
    pub value: Value,
    pub version: u64,
    pub access_count: u64,
}

#[derive(Debug, Default)]
struct StepRecord {
    status: Option<StepStatus>,
    result: Option<Value>,
    failure: Option<FailureReason>,
    skip: Option<SkipReason>,
    superseded_by: Option<StepId>,
}

#[derive(Debug, Default)]
struct StateInner {
    steps: BTreeMap<StepId, StepRecord>,
    shared: BTreeMap<String, SharedEntry>,
    transitions: Vec<StatusTransition>,
    /// 进入终态的顺序
    execution_order: Vec<StepId>,
}

/// 状态快照（Aggregator 的输入之一）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub request_id: String,
    pub statuses: BTreeMap<StepId, StepStatus>,
    pub results: BTreeMap<StepId, Value>,
    pub failures: BTreeMap<StepId, FailureReason>,
    pub skips: BTreeMap<StepId, SkipReason>,
    pub superseded: BTreeMap<StepId, StepId>,
    pub shared: BTreeMap<String, SharedEntrySnapshot>,
    pub execution_order: Vec<StepId>,
    pub transition_count: usize,
}

/// 请求级状态存储（每个请求一个实例，随 ExecutionContext 传递）
#[derive(Debug)]
pub struct StateStore {
    request_id: String,
    inner: RwLock<StateInner>,
}

impl StateStore {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            inner: RwLock::new(StateInner::default()),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// 记录状态迁移；返回日志条目
    pub async fn set_status(&self, step_id: StepId, to: StepStatus) -> StatusTransition {
        let mut inner = self.inner.write().await;
        let record = inner.steps.entry(step_id).or_default();
        let from = record.status.replace(to);
        if matches!(to, StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped) {
            inner.execution_order.push(step_id);
        }
        let transition = StatusTransition {
            seq: inner.transitions.len() as u64,
            step_id,
            from,
            to,
        };
        inner.transitions.push(transition);
        transition
    }

    pub async fn status(&self, step_id: StepId) -> Option<StepStatus> {
        self.inner
            .read()
            .await
            .steps
            .get(&step_id)
            .and_then(|r| r.status)
    }

    pub async fn set_result(&self, step_id: StepId, result: Value) {
        let mut inner = self.inner.write().await;
        let record = inner.steps.entry(step_id).or_default();
        record.result = Some(result);
        record.failure = None;
    }

    pub async fn result(&self, step_id: StepId) -> Option<Value> {
        self.inner
            .read()
            .await
            .steps
            .get(&step_id)
            .and_then(|r| r.result.clone())
    }

    pub async fn set_failure(&self, step_id: StepId, reason: FailureReason) {
        self.inner.write().await.steps.entry(step_id).or_default().failure = Some(reason);
    }

    pub async fn failure(&self, step_id: StepId) -> Option<FailureReason> {
        self.inner
            .read()
            .await
            .steps
            .get(&step_id)
            .and_then(|r| r.failure.clone())
    }

    pub async fn set_skip(&self, step_id: StepId, reason: SkipReason) {
        self.inner.write().await.steps.entry(step_id).or_default().skip = Some(reason);
    }

    pub async fn skip_reason(&self, step_id: StepId) -> Option<SkipReason> {
        self.inner
            .read()
            .await
            .steps
            .get(&step_id)
            .and_then(|r| r.skip.clone())
    }

    /// 失败步骤被副本接替
    pub async fn set_superseded(&self, step_id: StepId, replacement: StepId) {
        self.inner.write().await.steps.entry(step_id).or_default().superseded_by = Some(replacement);
    }

    /// 写入共享键；返回该键的新版本号
    pub async fn put_shared(&self, key: impl Into<String>, value: Value) -> u64 {
        let mut inner = self.inner.write().await;
        let key = key.into();
        match inner.shared.get_mut(&key) {
            Some(entry) => {
                entry.value = value;
                entry.version += 1;
                entry.version
            }
            None => {
                inner.shared.insert(
                    key,
                    SharedEntry {
                        value,
                        version: 1,
                        access_count: AtomicU64::new(0),
                    },
                );
                1
            }
        }
    }

    /// 读取共享键（计入访问次数）
    pub async fn get_shared(&self, key: &str) -> Option<Value> {
        let inner = self.inner.read().await;
        inner.shared.get(key).map(|entry| {
            entry.access_count.fetch_add(1, Ordering::Relaxed);
            entry.value.clone()
        })
    }

    /// 读取条目元数据（不计入访问次数）
    pub async fn shared_entry(&self, key: &str) -> Option<SharedEntrySnapshot> {
        let inner = self.inner.read().await;
        inner.shared.get(key).map(snapshot_entry)
    }

    pub async fn transitions(&self) -> Vec<StatusTransition> {
        self.inner.read().await.transitions.clone()
    }

    pub async fn execution_order(&self) -> Vec<StepId> {
        self.inner.read().await.execution_order.clone()
    }

    /// 迁移日志中同时处于 Running 的最大步骤数
    pub async fn peak_running(&self) -> usize {
        peak_running(&self.inner.read().await.transitions)
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.read().await;
        let mut snapshot = StateSnapshot {
            request_id: self.request_id.clone(),
            statuses: BTreeMap::new(),
            results: BTreeMap::new(),
            failures: BTreeMap::new(),
            skips: BTreeMap::new(),
            superseded: BTreeMap::new(),
            shared: inner
                .shared
                .iter()
                .map(|(k, e)| (k.clone(), snapshot_entry(e)))
                .collect(),
            execution_order: inner.execution_order.clone(),
            transition_count: inner.transitions.len(),
        };
        for (id, record) in &inner.steps {
            if let Some(status) = record.status {
                snapshot.statuses.insert(*id, status);
            }
            if let Some(result) = &record.result {
                snapshot.results.insert(*id, result.clone());
            }
            if let Some(failure) = &record.failure {
                snapshot.failures.insert(*id, failure.clone());
            }
            if let Some(skip) = &record.skip {
                snapshot.skips.insert(*id, skip.clone());
            }
            if let Some(replacement) = record.superseded_by {
                snapshot.superseded.insert(*id, replacement);
            }
        }
        snapshot
    }
}

fn snapshot_entry(entry: &SharedEntry) -> SharedEntrySnapshot {
    SharedEntrySnapshot {
        value: entry.value.clone(),
        version: entry.version,
        access_count: entry.access_count.load(Ordering::Relaxed),
    }
}

/// 按迁移日志重放，统计 Running 的峰值
pub fn peak_running(transitions: &[StatusTransition]) -> usize {
    let mut running = 0usize;
    let mut peak = 0usize;
    for t in transitions {
        if t.from == Some(StepStatus::Running) {
            running = running.saturating_sub(1);
        }
        if t.to == StepStatus::Running {
            running += 1;
            peak = peak.max(running);
        }
    }
    peak
}
