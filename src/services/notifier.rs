//! 运行事件推送
//!
//! 发布是即发即弃的：没有订阅者、订阅者落后都不影响运行本身。

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::models::{LogLevel, RunEvent};
use crate::utils::logging::run_label;

/// 带运行标识的事件
#[derive(Debug, Clone, PartialEq)]
pub struct RunNotification {
    pub run_id: String,
    pub event: RunEvent,
}

pub trait NotificationSink: Send + Sync {
    fn publish(&self, run_id: &str, event: RunEvent);
}

/// 广播给任意数量的订阅者
pub struct BroadcastSink {
    sender: broadcast::Sender<RunNotification>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunNotification> {
        self.sender.subscribe()
    }
}

impl NotificationSink for BroadcastSink {
    fn publish(&self, run_id: &str, event: RunEvent) {
        // 没有订阅者时 send 返回 Err，忽略即可
        let _ = self.sender.send(RunNotification {
            run_id: run_id.to_string(),
            event,
        });
    }
}

/// 写入 tracing 日志
#[derive(Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn publish(&self, run_id: &str, event: RunEvent) {
        let label = run_label(run_id);
        match event {
            RunEvent::Log { level, message } => match level {
                LogLevel::Info => info!("[运行 {}] {}", label, message),
                LogLevel::Success => info!("[运行 {}] ✅ {}", label, message),
                LogLevel::Warning => warn!("[运行 {}] ⚠️ {}", label, message),
                LogLevel::Error => error!("[运行 {}] ❌ {}", label, message),
            },
            RunEvent::Status {
                status,
                node,
                progress,
                message,
            } => debug!(
                "[运行 {}] 状态 {} @ {} ({}%): {}",
                label, status, node, progress, message
            ),
            RunEvent::Media { step, screenshot_base64 } => debug!(
                "[运行 {}] 📸 截图 {} ({} 字节)",
                label,
                step,
                screenshot_base64.len()
            ),
            RunEvent::InputRequested(pending) => info!(
                "[运行 {}] ⏸️ 等待人工输入 {} ({}): {}",
                label, pending.kind, pending.field_id, pending.reason
            ),
            RunEvent::Result { success, message } => {
                if success {
                    info!("[运行 {}] 🎉 {}", label, message);
                } else {
                    warn!("[运行 {}] 💥 {}", label, message);
                }
            }
        }
    }
}

/// 同时发给多个下游
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl NotificationSink for FanoutSink {
    fn publish(&self, run_id: &str, event: RunEvent) {
        for sink in &self.sinks {
            sink.publish(run_id, event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_silent() {
        let sink = BroadcastSink::new(8);
        sink.publish("r1", RunEvent::log(LogLevel::Info, "nobody listens"));
    }

    #[tokio::test]
    async fn fanout_reaches_every_subscriber() {
        let broadcast = Arc::new(BroadcastSink::new(8));
        let mut rx = broadcast.subscribe();
        let fanout = FanoutSink::new()
            .with(Arc::new(LogSink))
            .with(broadcast.clone());

        fanout.publish(
            "r1",
            RunEvent::Result {
                success: true,
                message: "done".into(),
            },
        );
        let received = rx.recv().await.unwrap();
        assert_eq!(received.run_id, "r1");
        assert_eq!(received.event.name(), "result");
    }
}
