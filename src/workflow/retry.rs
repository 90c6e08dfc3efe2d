//! 重试 / 错误恢复策略
//!
//! 先检查上限再计数：`retry_count >= max_retries` 时直接失败，否则计数加一后重试同一轮。
//! 只有基础设施故障需要退避，`retry` 决策立即重试。

use std::time::Duration;

use crate::config::Config;

/// 一次失败后的处理结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// 重试，`attempt` 为本次是第几次重试（从 1 开始）
    Retry { attempt: u32 },
    /// 已到上限，运行失败
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_cap_ms),
        )
    }

    /// 判断当前失败是否还能重试
    pub fn verdict(&self, retry_count: u32, max_retries: u32) -> RetryVerdict {
        if retry_count >= max_retries {
            RetryVerdict::GiveUp
        } else {
            RetryVerdict::Retry {
                attempt: retry_count + 1,
            }
        }
    }

    /// 第 `attempt` 次重试前的退避时长：base * 2^(attempt-1)，不超过 cap
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let multiplied = self.base.saturating_mul(1u32 << exponent);
        multiplied.min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gives_up_once_ceiling_reached() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.verdict(0, 3), RetryVerdict::Retry { attempt: 1 });
        assert_eq!(policy.verdict(2, 3), RetryVerdict::Retry { attempt: 3 });
        assert_eq!(policy.verdict(3, 3), RetryVerdict::GiveUp);
        assert_eq!(policy.verdict(0, 0), RetryVerdict::GiveUp);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(5), Duration::from_millis(1000));
        assert_eq!(policy.backoff(64), Duration::from_millis(1000));
    }

    #[test]
    fn retry_count_never_exceeds_ceiling() {
        let policy = RetryPolicy::default();
        for max in 0..6u32 {
            let mut count = 0;
            let mut failures = 0;
            loop {
                failures += 1;
                match policy.verdict(count, max) {
                    RetryVerdict::Retry { attempt } => count = attempt,
                    RetryVerdict::GiveUp => break,
                }
                assert!(count <= max);
            }
            assert_eq!(failures, max + 1);
        }
    }
}
