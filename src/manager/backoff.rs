//! # 重试退避

use rand::Rng;
use std::time::Duration;

/// 退避基数（毫秒）
pub const BASE_BACKOFF_MS: u64 = 1_000;
/// 退避上限（毫秒），不含抖动
pub const MAX_BACKOFF_MS: u64 = 64_000;
/// 抖动上限（毫秒），取值区间为 `[0, MAX_JITTER_MS)`
pub const MAX_JITTER_MS: u64 = 1_000;

/// 不含抖动的退避时长：`min(base * 2^attempt, cap)`，attempt 从0开始
#[must_use]
pub fn capped_backoff(attempt: u32) -> Duration {
    let exponential = 2_u64
        .checked_pow(attempt)
        .and_then(|factor| BASE_BACKOFF_MS.checked_mul(factor))
        .unwrap_or(u64::MAX);
    Duration::from_millis(exponential.min(MAX_BACKOFF_MS))
}

/// 计算第 `attempt` 次失败后的等待时长（含随机抖动）
#[must_use]
pub fn calculate_backoff(attempt: u32) -> Duration {
    let jitter_us = rand::thread_rng().gen_range(0..MAX_JITTER_MS * 1_000);
    capped_backoff(attempt) + Duration::from_micros(jitter_us)
}
