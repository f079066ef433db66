//! # 语义缓存实现
//!
//! 条目按插入顺序保存；读取时从最新到最旧扫描，顺带清理过期条目，
//! 返回相似度不低于阈值且最高的条目。超过容量时按 FIFO 淘汰最旧条目。

use crate::ldebug;
use crate::logging::{LogComponent, LogStage};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// 语义缓存参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticCacheConfig {
    /// 命中所需的最低余弦相似度
    pub threshold: f64,
    /// 条目存活时间（秒）
    pub ttl_secs: u64,
    /// 最大条目数
    pub max_entries: usize,
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            ttl_secs: 24 * 60 * 60,
            max_entries: 500,
        }
    }
}

impl SemanticCacheConfig {
    /// 条目存活时间
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// 缓存的响应：单个结果或流式结果的全部分片
#[derive(Debug, Clone, PartialEq)]
pub enum CachedResponse<T> {
    /// 普通调用的结果
    Value(T),
    /// 流式调用完整收集到的分片
    Chunks(Vec<T>),
}

/// 缓存统计信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// 未过期的条目数
    pub entries: usize,
    /// 命中次数
    pub hit_count: u64,
    /// 未命中次数
    pub miss_count: u64,
}

impl CacheStats {
    /// 命中率
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let rate = self.hit_count as f64 / total as f64;
            rate
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    prompt: String,
    vector: Vec<f32>,
    value: V,
    inserted_at: Instant,
}

/// 余弦相似度
///
/// 维度不同或任一向量范数为0时返回0。
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0_f64, 0.0_f64, 0.0_f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 {
        0.0
    } else {
        dot / denominator
    }
}

/// 语义缓存
#[derive(Debug)]
pub struct SemanticCache<V> {
    entries: Mutex<VecDeque<CacheEntry<V>>>,
    config: SemanticCacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> SemanticCache<V> {
    /// 创建缓存
    #[must_use]
    pub fn new(config: SemanticCacheConfig) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 缓存参数
    #[must_use]
    pub const fn config(&self) -> &SemanticCacheConfig {
        &self.config
    }

    /// 写入条目，同一提示词的旧条目被替换
    pub fn set(&self, prompt: impl Into<String>, vector: Vec<f32>, value: V) {
        let prompt = prompt.into();
        let mut entries = self.lock();

        entries.retain(|e| e.prompt != prompt);
        entries.push_back(CacheEntry {
            prompt,
            vector,
            value,
            inserted_at: Instant::now(),
        });

        while entries.len() > self.config.max_entries {
            entries.pop_front();
        }
    }

    /// 按向量查找，返回相似度最高且不低于阈值的条目
    pub fn get(&self, vector: &[f32]) -> Option<V> {
        self.lookup(vector, |_| true)
    }

    /// 同 [`get`](Self::get)，但只考虑满足 `accept` 的条目
    pub fn lookup(&self, vector: &[f32], accept: impl Fn(&V) -> bool) -> Option<V> {
        let ttl = self.config.ttl();
        let mut entries = self.lock();

        let mut best: Option<(usize, f64)> = None;
        let mut index = entries.len();
        while index > 0 {
            index -= 1;
            if entries[index].inserted_at.elapsed() > ttl {
                entries.remove(index);
                // 已删除元素之后的下标整体前移，最佳下标需要修正
                if let Some((best_index, _)) = best.as_mut() {
                    *best_index -= 1;
                }
                continue;
            }

            let entry = &entries[index];
            if !accept(&entry.value) {
                continue;
            }
            let similarity = cosine_similarity(vector, &entry.vector);
            if similarity >= self.config.threshold
                && best.is_none_or(|(_, highest)| similarity > highest)
            {
                best = Some((index, similarity));
            }
        }

        match best {
            Some((index, similarity)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                ldebug!(
                    "system",
                    LogStage::Cache,
                    LogComponent::SemanticCache,
                    "cache_hit",
                    "Semantic cache hit",
                    similarity = similarity
                );
                Some(entries[index].value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// 当前条目数，包含尚未被清理的过期条目
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// 是否为空
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 清空缓存
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// 统计信息
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let ttl = self.config.ttl();
        let entries = self
            .lock()
            .iter()
            .filter(|e| e.inserted_at.elapsed() <= ttl)
            .count();
        CacheStats {
            entries,
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cache(max_entries: usize) -> SemanticCache<&'static str> {
        SemanticCache::new(SemanticCacheConfig {
            threshold: 0.95,
            ttl_secs: 60,
            max_entries,
        })
    }

    #[test]
    fn test_cosine_basics() {
        assert!((cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = cache(10);
        cache.set("hello", vec![1.0, 0.0, 0.0], "greeting");

        assert_eq!(cache.get(&[0.99, 0.05, 0.0]), Some("greeting"));
        assert_eq!(cache.get(&[0.0, 1.0, 0.0]), None);

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_set_replaces_same_prompt() {
        let cache = cache(10);
        cache.set("p", vec![1.0, 0.0], "old");
        cache.set("p", vec![1.0, 0.0], "new");

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&[1.0, 0.0]), Some("new"));
    }

    #[test]
    fn test_fifo_eviction_over_capacity() {
        let cache = cache(2);
        cache.set("a", vec![1.0, 0.0, 0.0], "a");
        cache.set("b", vec![0.0, 1.0, 0.0], "b");
        cache.set("c", vec![0.0, 0.0, 1.0], "c");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&[1.0, 0.0, 0.0]), None);
        assert_eq!(cache.get(&[0.0, 0.0, 1.0]), Some("c"));
    }

    #[test]
    fn test_best_match_wins_and_newest_breaks_ties() {
        let cache = cache(10);
        cache.set("close", vec![1.0, 0.1], "close");
        cache.set("exact", vec![1.0, 0.0], "exact");
        cache.set("exact-again", vec![2.0, 0.0], "exact-newer");

        assert_eq!(cache.get(&[1.0, 0.0]), Some("exact-newer"));
    }

    #[test]
    fn test_lookup_filters_values() {
        let cache = cache(10);
        cache.set("a", vec![1.0, 0.0], "chunks");
        assert_eq!(cache.lookup(&[1.0, 0.0], |v| *v != "chunks"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_never_returned() {
        let cache = cache(10);
        cache.set("old", vec![1.0, 0.0], "old");
        tokio::time::advance(Duration::from_secs(61)).await;
        cache.set("fresh", vec![0.0, 1.0], "fresh");

        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.get(&[1.0, 0.0]), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&[0.0, 1.0]), Some("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_cleanup_keeps_best_index_valid() {
        let cache = cache(10);
        cache.set("stale", vec![0.0, 1.0], "stale");
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.set("match", vec![1.0, 0.0], "match");
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(cache.get(&[1.0, 0.0]), Some("match"));
        assert_eq!(cache.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_self_similarity_is_one(v in prop::collection::vec(-100.0_f32..100.0, 1..32)) {
            prop_assume!(v.iter().any(|x| x.abs() > 1e-3));
            let sim = cosine_similarity(&v, &v);
            prop_assert!((sim - 1.0).abs() < 1e-6);
        }

        #[test]
        fn prop_similarity_is_bounded_and_symmetric(
            pair in (1usize..16).prop_flat_map(|n| (
                prop::collection::vec(-10.0_f32..10.0, n),
                prop::collection::vec(-10.0_f32..10.0, n),
            ))
        ) {
            let (a, b) = pair;
            let ab = cosine_similarity(&a, &b);
            let ba = cosine_similarity(&b, &a);
            prop_assert!((-1.0 - 1e-9..=1.0 + 1e-9).contains(&ab));
            prop_assert!((ab - ba).abs() < 1e-12);
        }
    }
}
