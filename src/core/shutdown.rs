//! 中止信号处理
//!
//! 把 Ctrl+C / SIGTERM 转为请求级中止：取消 ExecutionContext 的中止令牌，
//! 调度器随即跳过未开始的步骤，并协作式取消运行中的步骤。

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// 中止原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 用户发起（Ctrl+C）
    UserInitiated,
    /// SIGTERM 信号
    Signal,
}

/// 中止信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

impl ShutdownManager {
    /// 绑定到给定令牌（通常是 ExecutionContext::abort()）
    pub fn new(token: CancellationToken) -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self { token, reason_tx }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发中止
    pub fn shutdown(&self, reason: ShutdownReason) {
        let _ = self.reason_tx.send(reason);
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 订阅中止原因
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, aborting request...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, aborting request...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}
