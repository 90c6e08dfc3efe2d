//! 运行控制信号
//!
//! 取消和暂停都只在两轮之间的安全点检查，不会打断进行中的动作。

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

use crate::utils::logging::run_label;

#[derive(Debug)]
pub struct RunControl {
    run_id: String,
    cancel: CancellationToken,
    pause: AtomicBool,
}

impl RunControl {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            cancel: CancellationToken::new(),
            pause: AtomicBool::new(false),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 等待取消信号（用于可中断的退避等待）
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    /// 读取并清除暂停请求
    pub fn take_pause(&self) -> bool {
        self.pause.swap(false, Ordering::SeqCst)
    }
}

impl Display for RunControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[运行 {}]", run_label(&self.run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_request_is_consumed_once() {
        let control = RunControl::new("0123456789");
        assert!(!control.take_pause());
        control.request_pause();
        assert!(control.take_pause());
        assert!(!control.take_pause());
        assert_eq!(control.to_string(), "[运行 01234567]");
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let control = RunControl::new("r1");
        control.cancel();
        control.cancelled().await;
        assert!(control.is_cancelled());
    }
}
