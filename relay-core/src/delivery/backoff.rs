//! 退避策略（BackoffPolicy）
//!
//! 第 `k` 次失败后的等待时长为 `base × 2^k`，默认 `base = 1s`，
//! 即 `2^k × 1000ms`；无抖动，除 `max_attempts` 外不设上限。
//! 次数达到上限时给出终止决策，存储随之迁移到 FAILED。
//!
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
        }
    }
}

/// 一次失败后的处置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 保持 PENDING，`delay` 后再次投递
    Retry { attempt: i32, delay: Duration },
    /// 次数耗尽，迁移到 FAILED
    Exhausted { attempt: i32 },
}

impl RetryDecision {
    pub fn attempt(&self) -> i32 {
        match self {
            RetryDecision::Retry { attempt, .. } | RetryDecision::Exhausted { attempt } => *attempt,
        }
    }

    /// 写入存储的退避时长；终止决策为零
    pub fn backoff(&self) -> Duration {
        match self {
            RetryDecision::Retry { delay, .. } => *delay,
            RetryDecision::Exhausted { .. } => Duration::ZERO,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// `base × 2^attempt`，溢出时饱和
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(Duration::MAX)
    }

    pub fn decide(&self, previous_attempts: i32, max_attempts: i32) -> RetryDecision {
        let attempt = previous_attempts.saturating_add(1);
        if attempt >= max_attempts {
            return RetryDecision::Exhausted {
                attempt: attempt.min(max_attempts.max(1)),
            };
        }

        RetryDecision::Retry {
            attempt,
            delay: self.delay(attempt.unsigned_abs()),
        }
    }
}
