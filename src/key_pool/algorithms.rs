//! # 密钥选择算法实现
//!
//! 从已过滤的候选密钥中选出一个，候选集由密钥池负责构建（剔除 DEAD 与冷却中的密钥）

use super::types::KeyState;
use crate::ldebug;
use crate::logging::{LogComponent, LogStage, mask_key};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// 选择策略枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    /// 失败次数最少、最久未使用优先
    #[default]
    Standard,
    /// 按权重随机
    Weighted,
    /// 平均延迟最低优先
    Latency,
}

impl FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" | "least_used" | "lru" => Ok(Self::Standard),
            "weighted" | "weight" | "w" => Ok(Self::Weighted),
            "latency" | "fastest" => Ok(Self::Latency),
            _ => Err(format!("Unknown selection strategy: {s}")),
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SelectionStrategy {
    /// 转换为字符串
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Weighted => "weighted",
            Self::Latency => "latency",
        }
    }
}

/// 密钥选择器特质
///
/// 返回候选列表中被选中项的下标；候选为空时返回 `None`。
pub trait KeySelector: Send + Sync {
    /// 从候选中选择一个密钥
    fn select(&self, candidates: &[&KeyState]) -> Option<usize>;

    /// 获取选择器名称
    fn name(&self) -> &'static str;
}

/// 标准选择器：按 (失败次数, 最近使用时间) 升序
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardKeySelector;

impl KeySelector for StandardKeySelector {
    fn select(&self, candidates: &[&KeyState]) -> Option<usize> {
        let (index, key) = candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, k)| (k.fail_count, k.last_used))?;

        ldebug!(
            "system",
            LogStage::Scheduling,
            LogComponent::Selector,
            "select_key",
            "Selected API key using standard strategy",
            key = %mask_key(&key.key),
            fail_count = key.fail_count,
            last_used = key.last_used
        );
        Some(index)
    }

    fn name(&self) -> &'static str {
        "StandardKeySelector"
    }
}

/// 权重选择器：按权重比例随机抽取
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedKeySelector;

impl WeightedKeySelector {
    /// 给定 `[0, total)` 内的随机值，按累积权重定位候选
    fn pick(candidates: &[&KeyState], draw: f64) -> usize {
        let mut remaining = draw;
        for (index, key) in candidates.iter().enumerate() {
            if key.weight <= 0.0 {
                continue;
            }
            remaining -= key.weight;
            if remaining < 0.0 {
                return index;
            }
        }
        // 浮点误差或总权重为0时落到第一个正权重候选，再不行取第一个
        candidates.iter().position(|k| k.weight > 0.0).unwrap_or(0)
    }
}

impl KeySelector for WeightedKeySelector {
    fn select(&self, candidates: &[&KeyState]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let total_weight: f64 = candidates.iter().map(|k| k.weight.max(0.0)).sum();
        let index = if total_weight.is_finite() && total_weight > 0.0 {
            let draw = rand::thread_rng().gen_range(0.0..total_weight);
            Self::pick(candidates, draw)
        } else {
            // 总权重溢出时取第一个正权重候选
            candidates.iter().position(|k| k.weight > 0.0).unwrap_or(0)
        };

        ldebug!(
            "system",
            LogStage::Scheduling,
            LogComponent::Selector,
            "select_key",
            "Selected API key using weighted strategy",
            key = %mask_key(&candidates[index].key),
            key_weight = candidates[index].weight,
            total_weight = total_weight
        );
        Some(index)
    }

    fn name(&self) -> &'static str {
        "WeightedKeySelector"
    }
}

/// 延迟选择器：平均延迟最低优先，未测量的密钥（平均为0）最先
#[derive(Debug, Default, Clone, Copy)]
pub struct LatencyKeySelector;

impl KeySelector for LatencyKeySelector {
    fn select(&self, candidates: &[&KeyState]) -> Option<usize> {
        let (index, key) = candidates.iter().enumerate().min_by(|(_, a), (_, b)| {
            a.average_latency
                .partial_cmp(&b.average_latency)
                .unwrap_or(Ordering::Equal)
                .then(a.last_used.cmp(&b.last_used))
        })?;

        ldebug!(
            "system",
            LogStage::Scheduling,
            LogComponent::Selector,
            "select_key",
            "Selected API key using latency strategy",
            key = %mask_key(&key.key),
            average_latency = key.average_latency
        );
        Some(index)
    }

    fn name(&self) -> &'static str {
        "LatencyKeySelector"
    }
}

/// 创建密钥选择器
#[must_use]
pub fn create_key_selector(strategy: SelectionStrategy) -> Arc<dyn KeySelector> {
    match strategy {
        SelectionStrategy::Standard => Arc::new(StandardKeySelector),
        SelectionStrategy::Weighted => Arc::new(WeightedKeySelector),
        SelectionStrategy::Latency => Arc::new(LatencyKeySelector),
    }
}
