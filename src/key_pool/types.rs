//! # 密钥池类型定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// 健康，可参与选择
    #[default]
    Closed,
    /// 冷却中，到达重测时间前不可用
    Open,
    /// 重测窗口，下一次失败重新打开，成功则关闭
    HalfOpen,
    /// 终态，永久不可用
    Dead,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
            Self::Dead => write!(f, "DEAD"),
        }
    }
}

impl FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CLOSED" => Ok(Self::Closed),
            "OPEN" => Ok(Self::Open),
            "HALF_OPEN" => Ok(Self::HalfOpen),
            "DEAD" => Ok(Self::Dead),
            _ => Err(format!("Invalid circuit state: {s}")),
        }
    }
}

/// 默认服务商标签
pub const DEFAULT_PROVIDER: &str = "default";

fn default_weight() -> f64 {
    1.0
}

/// 规范化权重：负数与 NaN 记为0，正无穷截断为 `f64::MAX`
pub(crate) fn sanitize_weight(weight: f64) -> f64 {
    if weight.is_nan() {
        0.0
    } else {
        weight.clamp(0.0, f64::MAX)
    }
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

/// 单个密钥的运行状态
///
/// 时间戳均为 Unix 毫秒。序列化字段使用 camelCase，与持久化的状态快照保持一致。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyState {
    /// 密钥字符串，池内唯一
    pub key: String,
    /// 连续失败次数
    #[serde(default)]
    pub fail_count: u32,
    /// 最近一次失败时间
    #[serde(default)]
    pub failed_at: Option<i64>,
    /// 最近一次失败是否为配额类错误
    #[serde(default)]
    pub is_quota_error: bool,
    /// 熔断器状态
    #[serde(default)]
    pub circuit_state: CircuitState,
    /// 最近一次被选中的时间
    #[serde(default)]
    pub last_used: i64,
    /// 累计成功次数
    #[serde(default)]
    pub success_count: u64,
    /// 累计请求次数
    #[serde(default)]
    pub total_requests: u64,
    /// 计划的半开重测时间
    #[serde(default)]
    pub half_open_test_time: Option<i64>,
    /// 显式冷却时长覆盖（毫秒），来自服务商的重试提示
    #[serde(default)]
    pub custom_cooldown: Option<u64>,
    /// 选择权重
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// 滚动平均延迟（毫秒）
    #[serde(default)]
    pub average_latency: f64,
    /// 累计延迟（毫秒）
    #[serde(default)]
    pub total_latency: f64,
    /// 延迟样本数
    #[serde(default)]
    pub latency_samples: u64,
    /// 服务商标签
    #[serde(default = "default_provider")]
    pub provider: String,
}

impl KeyState {
    /// 创建默认状态的密钥记录
    #[must_use]
    pub fn new(key: impl Into<String>, weight: f64, provider: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fail_count: 0,
            failed_at: None,
            is_quota_error: false,
            circuit_state: CircuitState::Closed,
            last_used: 0,
            success_count: 0,
            total_requests: 0,
            half_open_test_time: None,
            custom_cooldown: None,
            weight: sanitize_weight(weight),
            average_latency: 0.0,
            total_latency: 0.0,
            latency_samples: 0,
            provider: provider.into(),
        }
    }

    /// 是否已永久失效
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.circuit_state == CircuitState::Dead
    }
}

/// 构造密钥池的输入项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyInput {
    /// 密钥字符串
    pub key: String,
    /// 选择权重
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// 服务商标签
    #[serde(default = "default_provider")]
    pub provider: String,
}

impl KeyInput {
    /// 以默认权重和服务商创建输入项
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            weight: 1.0,
            provider: DEFAULT_PROVIDER.to_string(),
        }
    }

    /// 设置权重
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// 设置服务商标签
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// 将字符串列表解析为输入项，每个字符串可以是逗号拼接的多个密钥
    #[must_use]
    pub fn parse_list<S: AsRef<str>>(raw: &[S]) -> Vec<Self> {
        raw.iter()
            .flat_map(|entry| {
                entry
                    .as_ref()
                    .split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(Self::new)
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl From<&str> for KeyInput {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for KeyInput {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

/// 密钥池统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PoolStats {
    /// 密钥总数
    pub total: usize,
    /// 当前可参与选择的密钥数
    pub healthy: usize,
    /// 冷却中的密钥数（不含 DEAD）
    pub cooling: usize,
    /// 永久失效的密钥数
    pub dead: usize,
}

/// 熔断器参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// 连续失败多少次后打开熔断
    pub max_consecutive_failures: u32,
    /// 瞬时错误冷却（毫秒）
    pub transient_cooldown_ms: u64,
    /// 配额错误冷却（毫秒）
    pub quota_cooldown_ms: u64,
    /// 默认半开重测延迟（毫秒）
    pub half_open_test_delay_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            transient_cooldown_ms: 60 * 1000,
            quota_cooldown_ms: 5 * 60 * 1000,
            half_open_test_delay_ms: 60 * 1000,
        }
    }
}

impl CircuitBreakerConfig {
    /// 瞬时错误冷却时长
    #[must_use]
    pub const fn transient_cooldown(&self) -> Duration {
        Duration::from_millis(self.transient_cooldown_ms)
    }

    /// 配额错误冷却时长
    #[must_use]
    pub const fn quota_cooldown(&self) -> Duration {
        Duration::from_millis(self.quota_cooldown_ms)
    }
}
