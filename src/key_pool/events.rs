//! # 密钥池事件通知
//!
//! 密钥池与编排器在状态变化时同步通知监听者。监听者只用于日志/指标等旁路用途，
//! 核心逻辑的正确性不依赖任何监听者。

use crate::logging::{LogComponent, LogStage, mask_key};
use crate::{linfo, lerror, lwarn};
use std::sync::Arc;
use std::time::Duration;

/// 降级原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackReason {
    /// 没有可用密钥
    Exhausted,
    /// 重试次数耗尽
    MaxRetries,
}

impl FallbackReason {
    /// 文本描述
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exhausted => "all keys exhausted",
            Self::MaxRetries => "max retries exceeded",
        }
    }
}

/// 时间点通知
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// 密钥被永久废弃
    KeyDead { key: String },
    /// 熔断打开
    CircuitOpen { key: String },
    /// 进入半开重测
    CircuitHalfOpen { key: String },
    /// 密钥从非 CLOSED 状态恢复
    KeyRecovered { key: String },
    /// 触发降级
    FallbackInvoked { reason: FallbackReason },
    /// 所有密钥都不可用
    AllKeysExhausted,
    /// 即将重试
    RetryAttempted {
        key: String,
        attempt: u32,
        delay: Duration,
    },
    /// 执行成功；缓存命中时 key 为 `CACHE_HIT`
    ExecuteSucceeded { key: String, duration: Duration },
    /// 单次尝试失败
    ExecuteFailed { key: String, error: String },
    /// 舱壁拒绝
    BulkheadRejected,
    /// 健康检查通过
    HealthCheckPassed { key: String },
    /// 健康检查失败
    HealthCheckFailed { key: String, error: String },
}

/// 监听者能力集合，所有方法都有空的默认实现，只需覆盖关心的通知
pub trait PoolEventListener: Send + Sync {
    /// 密钥被永久废弃
    fn on_key_dead(&self, _key: &str) {}
    /// 熔断打开
    fn on_circuit_open(&self, _key: &str) {}
    /// 进入半开
    fn on_circuit_half_open(&self, _key: &str) {}
    /// 密钥恢复
    fn on_key_recovered(&self, _key: &str) {}
    /// 触发降级
    fn on_fallback(&self, _reason: FallbackReason) {}
    /// 所有密钥不可用
    fn on_all_keys_exhausted(&self) {}
    /// 即将重试，`attempt` 从1开始
    fn on_retry(&self, _key: &str, _attempt: u32, _delay: Duration) {}
    /// 执行成功
    fn on_execute_success(&self, _key: &str, _duration: Duration) {}
    /// 单次尝试失败
    fn on_execute_failed(&self, _key: &str, _error: &str) {}
    /// 舱壁拒绝
    fn on_bulkhead_rejected(&self) {}
    /// 健康检查通过
    fn on_health_check_passed(&self, _key: &str) {}
    /// 健康检查失败
    fn on_health_check_failed(&self, _key: &str, _error: &str) {}
}

/// 事件分发器，持有全部监听者
#[derive(Clone, Default)]
pub struct EventDispatcher {
    listeners: Vec<Arc<dyn PoolEventListener>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl EventDispatcher {
    /// 使用给定监听者创建分发器
    #[must_use]
    pub fn new(listeners: Vec<Arc<dyn PoolEventListener>>) -> Self {
        Self { listeners }
    }

    /// 追加监听者
    pub fn add_listener(&mut self, listener: Arc<dyn PoolEventListener>) {
        self.listeners.push(listener);
    }

    /// 监听者数量
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// 是否没有监听者
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// 同步通知所有监听者
    pub fn emit(&self, event: &PoolEvent) {
        for listener in &self.listeners {
            match event {
                PoolEvent::KeyDead { key } => listener.on_key_dead(key),
                PoolEvent::CircuitOpen { key } => listener.on_circuit_open(key),
                PoolEvent::CircuitHalfOpen { key } => listener.on_circuit_half_open(key),
                PoolEvent::KeyRecovered { key } => listener.on_key_recovered(key),
                PoolEvent::FallbackInvoked { reason } => listener.on_fallback(*reason),
                PoolEvent::AllKeysExhausted => listener.on_all_keys_exhausted(),
                PoolEvent::RetryAttempted {
                    key,
                    attempt,
                    delay,
                } => listener.on_retry(key, *attempt, *delay),
                PoolEvent::ExecuteSucceeded { key, duration } => {
                    listener.on_execute_success(key, *duration);
                }
                PoolEvent::ExecuteFailed { key, error } => listener.on_execute_failed(key, error),
                PoolEvent::BulkheadRejected => listener.on_bulkhead_rejected(),
                PoolEvent::HealthCheckPassed { key } => listener.on_health_check_passed(key),
                PoolEvent::HealthCheckFailed { key, error } => {
                    listener.on_health_check_failed(key, error);
                }
            }
        }
    }

    /// 依次通知一批事件
    pub fn emit_all(&self, events: &[PoolEvent]) {
        for event in events {
            self.emit(event);
        }
    }
}

/// 将通知写入 tracing 日志的监听者
#[derive(Debug, Clone)]
pub struct TracingEventListener {
    tag: String,
}

impl TracingEventListener {
    /// 创建带服务商标签的监听者
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

impl PoolEventListener for TracingEventListener {
    fn on_key_dead(&self, key: &str) {
        lerror!(
            "system",
            LogStage::Scheduling,
            LogComponent::KeyPool,
            "key_dead",
            "API key permanently removed from rotation",
            provider = %self.tag,
            key = %mask_key(key)
        );
    }

    fn on_circuit_open(&self, key: &str) {
        lwarn!(
            "system",
            LogStage::Scheduling,
            LogComponent::KeyPool,
            "circuit_open",
            "Circuit opened for API key",
            provider = %self.tag,
            key = %mask_key(key)
        );
    }

    fn on_circuit_half_open(&self, key: &str) {
        linfo!(
            "system",
            LogStage::Scheduling,
            LogComponent::KeyPool,
            "circuit_half_open",
            "Circuit half-open, allowing trial request",
            provider = %self.tag,
            key = %mask_key(key)
        );
    }

    fn on_key_recovered(&self, key: &str) {
        linfo!(
            "system",
            LogStage::Scheduling,
            LogComponent::KeyPool,
            "key_recovered",
            "API key recovered",
            provider = %self.tag,
            key = %mask_key(key)
        );
    }

    fn on_fallback(&self, reason: FallbackReason) {
        lwarn!(
            "system",
            LogStage::Retry,
            LogComponent::Manager,
            "fallback",
            "Triggering fallback",
            provider = %self.tag,
            reason = reason.as_str()
        );
    }

    fn on_all_keys_exhausted(&self) {
        lerror!(
            "system",
            LogStage::Scheduling,
            LogComponent::KeyPool,
            "all_keys_exhausted",
            "All API keys exhausted",
            provider = %self.tag
        );
    }

    fn on_retry(&self, key: &str, attempt: u32, delay: Duration) {
        linfo!(
            "system",
            LogStage::Retry,
            LogComponent::Manager,
            "retry",
            "Retrying request",
            provider = %self.tag,
            key = %mask_key(key),
            attempt = attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
        );
    }

    fn on_bulkhead_rejected(&self) {
        lwarn!(
            "system",
            LogStage::Execution,
            LogComponent::Bulkhead,
            "bulkhead_rejected",
            "Bulkhead rejected request",
            provider = %self.tag
        );
    }

    fn on_health_check_failed(&self, key: &str, error: &str) {
        lwarn!(
            "system",
            LogStage::HealthCheck,
            LogComponent::HealthChecker,
            "health_check_failed",
            "Health check failed",
            provider = %self.tag,
            key = %mask_key(key),
            error = %error
        );
    }
}
