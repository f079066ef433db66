//! 集成测试共用的事件记录器与上游错误构造

#![allow(dead_code)]

use api_key_manager::key_pool::{FallbackReason, PoolEvent, PoolEventListener};
use api_key_manager::ApiError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 按顺序记录所有通知
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<PoolEvent>>,
}

impl EventLog {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<PoolEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn retry_attempts(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PoolEvent::RetryAttempted { attempt, .. } => Some(attempt),
                _ => None,
            })
            .collect()
    }

    pub fn fallback_reasons(&self) -> Vec<FallbackReason> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PoolEvent::FallbackInvoked { reason } => Some(reason),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&PoolEvent) -> bool) -> usize {
        self.events().iter().filter(|event| predicate(event)).count()
    }

    fn push(&self, event: PoolEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl PoolEventListener for EventLog {
    fn on_key_dead(&self, key: &str) {
        self.push(PoolEvent::KeyDead { key: key.to_string() });
    }
    fn on_circuit_open(&self, key: &str) {
        self.push(PoolEvent::CircuitOpen { key: key.to_string() });
    }
    fn on_circuit_half_open(&self, key: &str) {
        self.push(PoolEvent::CircuitHalfOpen { key: key.to_string() });
    }
    fn on_key_recovered(&self, key: &str) {
        self.push(PoolEvent::KeyRecovered { key: key.to_string() });
    }
    fn on_fallback(&self, reason: FallbackReason) {
        self.push(PoolEvent::FallbackInvoked { reason });
    }
    fn on_all_keys_exhausted(&self) {
        self.push(PoolEvent::AllKeysExhausted);
    }
    fn on_retry(&self, key: &str, attempt: u32, delay: Duration) {
        self.push(PoolEvent::RetryAttempted {
            key: key.to_string(),
            attempt,
            delay,
        });
    }
    fn on_execute_success(&self, key: &str, duration: Duration) {
        self.push(PoolEvent::ExecuteSucceeded {
            key: key.to_string(),
            duration,
        });
    }
    fn on_execute_failed(&self, key: &str, error: &str) {
        self.push(PoolEvent::ExecuteFailed {
            key: key.to_string(),
            error: error.to_string(),
        });
    }
    fn on_bulkhead_rejected(&self) {
        self.push(PoolEvent::BulkheadRejected);
    }
}

pub fn status(code: u16) -> ApiError {
    ApiError::new(code, format!("upstream returned {code}"))
}
