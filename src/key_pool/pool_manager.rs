//! # API密钥池管理器
//!
//! 持有全部密钥记录及其熔断状态，负责候选过滤、委托选择策略、
//! 记录成功/失败并在每次变更后持久化状态。

use super::algorithms::{KeySelector, StandardKeySelector};
use super::classifier::{ErrorClassification, ErrorKind};
use super::events::{EventDispatcher, PoolEvent};
use super::types::{
    CircuitBreakerConfig, CircuitState, KeyInput, KeyState, PoolStats, sanitize_weight,
};
use crate::error::{ManagerError, Result};
use crate::logging::{LogComponent, LogStage, mask_key};
use crate::persistence::StorageAdapter;
use crate::{ldebug, linfo, lwarn};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// 状态快照在存储中的名称
pub const STATE_STORAGE_KEY: &str = "api_rotation_state_v2";

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis_i64(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

/// 密钥池构建器
pub struct KeyPoolBuilder {
    inputs: Vec<KeyInput>,
    storage: Option<Arc<dyn StorageAdapter>>,
    selector: Arc<dyn KeySelector>,
    config: CircuitBreakerConfig,
    events: EventDispatcher,
}

impl KeyPoolBuilder {
    /// 追加密钥输入
    #[must_use]
    pub fn keys<I, K>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyInput>,
    {
        self.inputs.extend(inputs.into_iter().map(Into::into));
        self
    }

    /// 设置持久化存储
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// 设置选择策略
    #[must_use]
    pub fn selector(mut self, selector: Arc<dyn KeySelector>) -> Self {
        self.selector = selector;
        self
    }

    /// 设置熔断参数
    #[must_use]
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置事件分发器
    #[must_use]
    pub fn events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    /// 构建密钥池，存在存储时恢复一次已保存的状态
    #[must_use]
    pub fn build(self) -> KeyPool {
        let pool = KeyPool {
            keys: Mutex::new(dedup_inputs(self.inputs)),
            storage: self.storage,
            selector: self.selector,
            config: self.config,
            events: self.events,
        };
        pool.load_state();

        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::KeyPool,
            "pool_created",
            "Key pool created",
            keys = pool.len(),
            selector = pool.selector.name(),
            persistent = pool.storage.is_some()
        );
        pool
    }
}

/// 合并重复密钥：保留首次出现的位置，后出现的权重与服务商覆盖之前的值
fn dedup_inputs(inputs: Vec<KeyInput>) -> Vec<KeyState> {
    let mut states: Vec<KeyState> = Vec::with_capacity(inputs.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for input in inputs {
        let key = input.key.trim();
        if key.is_empty() {
            continue;
        }
        if let Some(&index) = positions.get(key) {
            states[index].weight = sanitize_weight(input.weight);
            states[index].provider = input.provider;
        } else {
            positions.insert(key.to_string(), states.len());
            states.push(KeyState::new(key, input.weight, input.provider));
        }
    }
    states
}

/// 选择结果
enum Selection {
    Picked(String),
    Degraded(String),
    Empty,
}

/// 密钥池：密钥记录与熔断状态机
pub struct KeyPool {
    keys: Mutex<Vec<KeyState>>,
    storage: Option<Arc<dyn StorageAdapter>>,
    selector: Arc<dyn KeySelector>,
    config: CircuitBreakerConfig,
    events: EventDispatcher,
}

impl std::fmt::Debug for KeyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPool")
            .field("keys", &self.len())
            .field("selector", &self.selector.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KeyPool {
    /// 创建构建器，默认使用标准策略、默认熔断参数、无存储
    #[must_use]
    pub fn builder() -> KeyPoolBuilder {
        KeyPoolBuilder {
            inputs: Vec::new(),
            storage: None,
            selector: Arc::new(StandardKeySelector),
            config: CircuitBreakerConfig::default(),
            events: EventDispatcher::default(),
        }
    }

    /// 以默认配置从密钥列表创建
    #[must_use]
    pub fn new<I, K>(inputs: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyInput>,
    {
        Self::builder().keys(inputs).build()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<KeyState>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 熔断参数
    #[must_use]
    pub const fn circuit_breaker_config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// 事件分发器
    #[must_use]
    pub const fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// 密钥数量
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// 是否没有任何密钥
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 全部密钥记录的快照副本
    #[must_use]
    pub fn key_states(&self) -> Vec<KeyState> {
        self.lock().clone()
    }

    /// 单个密钥记录的副本
    #[must_use]
    pub fn key_state(&self, key: &str) -> Option<KeyState> {
        self.lock().iter().find(|k| k.key == key).cloned()
    }

    /// 冷却判定，OPEN 且到达重测时间时惰性转为 HALF_OPEN
    fn check_cooldown(&self, state: &mut KeyState, now: i64, events: &mut Vec<PoolEvent>) -> bool {
        if state.circuit_state == CircuitState::Open {
            if state.half_open_test_time.is_some_and(|t| now >= t) {
                state.circuit_state = CircuitState::HalfOpen;
                events.push(PoolEvent::CircuitHalfOpen {
                    key: state.key.clone(),
                });
                return false;
            }
            return true;
        }
        self.is_cooling(state, now)
    }

    /// 只读的冷却判定
    fn is_cooling(&self, state: &KeyState, now: i64) -> bool {
        match state.circuit_state {
            CircuitState::Dead => return true,
            CircuitState::Open => {
                return !state.half_open_test_time.is_some_and(|t| now >= t);
            }
            CircuitState::Closed | CircuitState::HalfOpen => {}
        }

        let Some(failed_at) = state.failed_at else {
            return false;
        };
        let elapsed = now.saturating_sub(failed_at);

        if let Some(custom) = state.custom_cooldown
            && custom > 0
            && elapsed < millis_i64(custom)
        {
            return true;
        }

        let window = if state.is_quota_error {
            self.config.quota_cooldown_ms
        } else {
            self.config.transient_cooldown_ms
        };
        elapsed < millis_i64(window)
    }

    /// 选择一个可用密钥
    ///
    /// 没有可用候选时退化为返回最早失败的非 DEAD 密钥；全部 DEAD 时返回 `None`。
    pub fn get_key(&self) -> Option<String> {
        self.select(None)
    }

    /// 在指定服务商的密钥中选择，没有可用候选时直接返回 `None`
    pub fn get_key_by_provider(&self, provider: &str) -> Option<String> {
        self.select(Some(provider))
    }

    fn select(&self, provider: Option<&str>) -> Option<String> {
        let now = now_millis();
        let mut events = Vec::new();

        let selection = {
            let mut keys = self.lock();

            let mut eligible = Vec::new();
            for (index, state) in keys.iter_mut().enumerate() {
                if state.is_dead() {
                    continue;
                }
                if let Some(provider) = provider
                    && state.provider != provider
                {
                    continue;
                }
                if !self.check_cooldown(state, now, &mut events) {
                    eligible.push(index);
                }
            }

            if eligible.is_empty() {
                if provider.is_some() {
                    Selection::Empty
                } else if let Some(oldest) = keys
                    .iter()
                    .filter(|k| !k.is_dead())
                    .min_by_key(|k| k.failed_at.unwrap_or(0))
                {
                    Selection::Degraded(oldest.key.clone())
                } else {
                    events.push(PoolEvent::AllKeysExhausted);
                    Selection::Empty
                }
            } else {
                let candidates: Vec<&KeyState> = eligible.iter().map(|&i| &keys[i]).collect();
                let picked = self.selector.select(&candidates).map(|pos| eligible[pos]);
                match picked {
                    Some(index) => {
                        keys[index].last_used = now;
                        let key = keys[index].key.clone();
                        self.persist(&keys);
                        Selection::Picked(key)
                    }
                    None => Selection::Empty,
                }
            }
        };

        self.events.emit_all(&events);

        match selection {
            Selection::Picked(key) => Some(key),
            Selection::Degraded(key) => {
                lwarn!(
                    "system",
                    LogStage::Scheduling,
                    LogComponent::KeyPool,
                    "degraded_selection",
                    "No healthy keys, using least recently failed key",
                    key = %mask_key(&key)
                );
                Some(key)
            }
            Selection::Empty => None,
        }
    }

    /// 记录一次成功
    ///
    /// 清空失败与冷却字段并回到 CLOSED；非 CLOSED 状态恢复时通知 key-recovered。
    /// DEAD 是终态，成功不会使其复活。
    pub fn mark_success(&self, key: &str, duration: Option<Duration>) {
        let mut events = Vec::new();
        {
            let mut keys = self.lock();
            let Some(state) = keys.iter_mut().find(|k| k.key == key) else {
                return;
            };
            if state.is_dead() {
                return;
            }

            if state.circuit_state != CircuitState::Closed {
                events.push(PoolEvent::KeyRecovered {
                    key: state.key.clone(),
                });
            }

            state.circuit_state = CircuitState::Closed;
            state.fail_count = 0;
            state.failed_at = None;
            state.is_quota_error = false;
            state.custom_cooldown = None;
            state.half_open_test_time = None;
            state.success_count += 1;
            state.total_requests += 1;

            if let Some(duration) = duration {
                state.total_latency += duration.as_secs_f64() * 1000.0;
                state.latency_samples += 1;
                #[allow(clippy::cast_precision_loss)]
                let samples = state.latency_samples as f64;
                state.average_latency = state.total_latency / samples;
            }

            self.persist(&keys);
        }
        self.events.emit_all(&events);
    }

    /// 按分类结果记录一次失败
    pub fn mark_failed(&self, key: &str, classification: &ErrorClassification) {
        let mut events = Vec::new();
        {
            let mut keys = self.lock();
            let Some(state) = keys.iter_mut().find(|k| k.key == key) else {
                return;
            };
            if state.is_dead() || !classification.mark_key_failed {
                return;
            }

            let now = now_millis();
            let is_quota = classification.kind == ErrorKind::Quota;
            state.failed_at = Some(now);
            state.fail_count += 1;
            state.total_requests += 1;
            state.is_quota_error = is_quota;
            state.custom_cooldown = (classification.cooldown_ms > 0).then_some(classification.cooldown_ms);

            if classification.mark_key_dead {
                state.circuit_state = CircuitState::Dead;
                events.push(PoolEvent::KeyDead {
                    key: state.key.clone(),
                });
            } else if state.circuit_state == CircuitState::HalfOpen {
                state.circuit_state = CircuitState::Open;
                state.half_open_test_time =
                    Some(now.saturating_add(millis_i64(self.config.half_open_test_delay_ms)));
                events.push(PoolEvent::CircuitOpen {
                    key: state.key.clone(),
                });
            } else if state.fail_count >= self.config.max_consecutive_failures || is_quota {
                let delay = if classification.cooldown_ms > 0 {
                    classification.cooldown_ms
                } else {
                    self.config.half_open_test_delay_ms
                };
                state.circuit_state = CircuitState::Open;
                state.half_open_test_time = Some(now.saturating_add(millis_i64(delay)));
                events.push(PoolEvent::CircuitOpen {
                    key: state.key.clone(),
                });
            }

            ldebug!(
                "system",
                LogStage::Scheduling,
                LogComponent::KeyPool,
                "mark_failed",
                "Recorded key failure",
                key = %mask_key(key),
                kind = %classification.kind,
                fail_count = state.fail_count,
                circuit_state = %state.circuit_state
            );

            self.persist(&keys);
        }
        self.events.emit_all(&events);
    }

    /// 池统计，不改变任何熔断状态
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let now = now_millis();
        let keys = self.lock();
        let mut stats = PoolStats {
            total: keys.len(),
            ..PoolStats::default()
        };
        for state in keys.iter() {
            if state.is_dead() {
                stats.dead += 1;
            } else if self.is_cooling(state, now) {
                stats.cooling += 1;
            } else {
                stats.healthy += 1;
            }
        }
        stats
    }

    /// 序列化全部记录，格式为以密钥为键的 JSON 对象
    pub fn snapshot(&self) -> Result<String> {
        Self::serialize(&self.lock())
    }

    fn serialize(keys: &[KeyState]) -> Result<String> {
        let mut map = Map::with_capacity(keys.len());
        for state in keys {
            map.insert(state.key.clone(), serde_json::to_value(state)?);
        }
        Ok(serde_json::to_string(&Value::Object(map))?)
    }

    /// 从快照恢复状态，只应用池中已存在的密钥，未知字段被忽略
    ///
    /// 返回成功应用的记录数。
    pub fn restore(&self, snapshot: &str) -> Result<usize> {
        let raw: Value = serde_json::from_str(snapshot)?;
        let Value::Object(raw) = raw else {
            return Err(crate::persistence_error!("状态快照必须是 JSON 对象"));
        };

        let mut keys = self.lock();
        let mut applied = 0;
        for state in keys.iter_mut() {
            let Some(Value::Object(stored)) = raw.get(&state.key) else {
                continue;
            };
            match merge_state(state, stored) {
                Ok(merged) => {
                    *state = merged;
                    applied += 1;
                }
                Err(e) => {
                    lwarn!(
                        "system",
                        LogStage::Persistence,
                        LogComponent::KeyPool,
                        "restore_key_state",
                        "Skipping unreadable stored key state",
                        key = %mask_key(&state.key),
                        error = %e
                    );
                }
            }
        }
        Ok(applied)
    }

    fn load_state(&self) {
        let Some(storage) = &self.storage else {
            return;
        };

        let result = storage
            .get(STATE_STORAGE_KEY)
            .and_then(|stored| stored.map_or(Ok(0), |s| self.restore(&s)));

        match result {
            Ok(applied) => {
                ldebug!(
                    "system",
                    LogStage::Startup,
                    LogComponent::KeyPool,
                    "load_state",
                    "Restored key pool state",
                    applied = applied
                );
            }
            Err(e) => {
                lwarn!(
                    "system",
                    LogStage::Startup,
                    LogComponent::KeyPool,
                    "load_state",
                    "Failed to restore key pool state, starting fresh",
                    error = %e
                );
            }
        }
    }

    /// 尽力写入存储，失败只记录日志
    fn persist(&self, keys: &[KeyState]) {
        let Some(storage) = &self.storage else {
            return;
        };

        let result = Self::serialize(keys).and_then(|blob| storage.set(STATE_STORAGE_KEY, &blob));
        if let Err(e) = result {
            lwarn!(
                "system",
                LogStage::Persistence,
                LogComponent::Storage,
                "persist_state",
                "Failed to persist key pool state",
                error = %e
            );
        }
    }
}

fn merge_state(current: &KeyState, stored: &Map<String, Value>) -> Result<KeyState> {
    let Value::Object(mut base) = serde_json::to_value(current)? else {
        return Err(ManagerError::internal("密钥状态序列化结果不是对象"));
    };
    for (field, value) in stored {
        if field != "key" && base.contains_key(field) {
            base.insert(field.clone(), value.clone());
        }
    }
    let mut merged: KeyState = serde_json::from_value(Value::Object(base))?;
    merged.weight = sanitize_weight(merged.weight);
    Ok(merged)
}
