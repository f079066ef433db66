//! # 管理器配置结构

use super::env_keys::parse_keys_with;
use crate::cache::SemanticCacheConfig;
use crate::ensure_config;
use crate::error::Result;
use crate::key_pool::{CircuitBreakerConfig, DEFAULT_PROVIDER, KeyInput, SelectionStrategy};
use crate::logging::{LogComponent, LogStage};
use crate::lwarn;
use crate::manager::{EmbeddingFn, ManagerOptions, SemanticCacheOptions};
use crate::persistence::{FileStorage, StorageAdapter};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// 语义缓存配置段
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticCacheSection {
    /// 是否启用
    pub enabled: bool,
    /// 命中阈值
    pub threshold: f64,
    /// 存活时间（秒）
    pub ttl_secs: u64,
    /// 最大条目数
    pub max_entries: usize,
}

impl Default for SemanticCacheSection {
    fn default() -> Self {
        let defaults = SemanticCacheConfig::default();
        Self {
            enabled: false,
            threshold: defaults.threshold,
            ttl_secs: defaults.ttl_secs,
            max_entries: defaults.max_entries,
        }
    }
}

impl SemanticCacheSection {
    /// 转换为缓存参数
    #[must_use]
    pub const fn cache_config(&self) -> SemanticCacheConfig {
        SemanticCacheConfig {
            threshold: self.threshold,
            ttl_secs: self.ttl_secs,
            max_entries: self.max_entries,
        }
    }
}

/// 密钥管理器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// 服务商标签
    pub provider: String,
    /// 直接配置的密钥
    pub keys: Vec<String>,
    /// 读取密钥的环境变量名
    pub env_keys: Vec<String>,
    /// 选择策略
    pub strategy: SelectionStrategy,
    /// 并发上限
    pub max_concurrency: Option<usize>,
    /// 熔断参数
    pub circuit_breaker: CircuitBreakerConfig,
    /// 语义缓存
    pub semantic_cache: SemanticCacheSection,
    /// 状态文件路径，未配置时只在内存中保存状态
    pub state_file: Option<PathBuf>,
    /// 启动时是否清空状态文件
    pub clear_state_on_init: bool,
    /// 健康检查间隔（秒）
    pub health_check_interval_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            keys: Vec::new(),
            env_keys: Vec::new(),
            strategy: SelectionStrategy::Standard,
            max_concurrency: None,
            circuit_breaker: CircuitBreakerConfig::default(),
            semantic_cache: SemanticCacheSection::default(),
            state_file: None,
            clear_state_on_init: true,
            health_check_interval_secs: 300,
        }
    }
}

impl ManagerConfig {
    /// 解析 TOML 文本并验证
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        ensure_config!(!self.provider.trim().is_empty(), "Provider must not be empty");
        ensure_config!(
            self.max_concurrency != Some(0),
            "max_concurrency must be greater than 0"
        );
        ensure_config!(
            self.circuit_breaker.max_consecutive_failures > 0,
            "circuit_breaker.max_consecutive_failures must be greater than 0"
        );
        let threshold = self.semantic_cache.threshold;
        ensure_config!(
            (0.0..=1.0).contains(&threshold),
            "semantic_cache.threshold must be within [0, 1], got {}",
            threshold
        );
        ensure_config!(
            !self.semantic_cache.enabled || self.semantic_cache.max_entries > 0,
            "semantic_cache.max_entries must be greater than 0"
        );
        Ok(())
    }

    /// 健康检查间隔
    #[must_use]
    pub const fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    /// 汇总直接配置与环境变量中的密钥，并打上服务商标签
    #[must_use]
    pub fn resolve_keys(&self) -> Vec<KeyInput> {
        self.resolve_keys_with(|name| std::env::var(name).ok())
    }

    /// 使用给定的环境查找函数汇总密钥
    pub fn resolve_keys_with<F>(&self, lookup: F) -> Vec<KeyInput>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut inputs = KeyInput::parse_list(self.keys.as_slice());
        inputs.extend(parse_keys_with(self.env_keys.as_slice(), lookup).into_iter().map(KeyInput::new));
        for input in &mut inputs {
            input.provider.clone_from(&self.provider);
        }
        inputs
    }

    /// 按配置创建持久化存储
    pub fn storage(&self) -> Result<Option<Arc<dyn StorageAdapter>>> {
        match &self.state_file {
            Some(path) => {
                let storage = FileStorage::new(path.clone(), self.clear_state_on_init)?;
                Ok(Some(Arc::new(storage)))
            }
            None => Ok(None),
        }
    }

    /// 转换为管理器选项
    ///
    /// 启用语义缓存时需要提供嵌入函数，否则缓存被忽略并记录警告。
    pub fn manager_options<T>(&self, embedding: Option<EmbeddingFn>) -> Result<ManagerOptions<T>> {
        let mut options = ManagerOptions::default()
            .with_strategy(self.strategy)
            .with_circuit_breaker(self.circuit_breaker);
        if let Some(max_concurrency) = self.max_concurrency {
            options = options.with_max_concurrency(max_concurrency);
        }
        if let Some(storage) = self.storage()? {
            options = options.with_storage(storage);
        }

        if self.semantic_cache.enabled {
            match embedding {
                Some(embedding) => {
                    options = options.with_semantic_cache(SemanticCacheOptions {
                        config: self.semantic_cache.cache_config(),
                        embedding,
                    });
                }
                None => {
                    lwarn!(
                        "system",
                        LogStage::Startup,
                        LogComponent::Config,
                        "semantic_cache_disabled",
                        "Semantic cache enabled in config but no embedding function provided",
                        provider = %self.provider
                    );
                }
            }
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.provider, "default");
        assert!(config.clear_state_on_init);
        assert_eq!(config.health_check_interval(), Duration::from_secs(300));
        assert_eq!(config.circuit_breaker.max_consecutive_failures, 5);
        assert!(!config.semantic_cache.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_toml() {
        let config = ManagerConfig::from_toml_str(
            r#"
            provider = "openai"
            keys = ["k1,k2"]
            env_keys = ["OPENAI_API_KEY"]
            strategy = "latency"
            max_concurrency = 20

            [circuit_breaker]
            max_consecutive_failures = 3
            transient_cooldown_ms = 1000

            [semantic_cache]
            enabled = true
            threshold = 0.9
            "#,
        )
        .unwrap();

        assert_eq!(config.provider, "openai");
        assert_eq!(config.strategy, SelectionStrategy::Latency);
        assert_eq!(config.max_concurrency, Some(20));
        assert_eq!(config.circuit_breaker.max_consecutive_failures, 3);
        assert_eq!(config.circuit_breaker.transient_cooldown_ms, 1000);
        assert_eq!(config.circuit_breaker.quota_cooldown_ms, 300_000);
        assert!(config.semantic_cache.enabled);
        assert_eq!(config.semantic_cache.cache_config().max_entries, 500);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ManagerConfig {
            max_concurrency: Some(0),
            ..ManagerConfig::default()
        };
        assert!(config.validate().is_err());

        config.max_concurrency = None;
        config.semantic_cache.threshold = 1.5;
        assert!(config.validate().is_err());

        config.semantic_cache.threshold = 0.9;
        config.circuit_breaker.max_consecutive_failures = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(ManagerConfig::from_toml_str("strategy = \"nope\"").is_err());
    }

    #[test]
    fn test_resolve_keys_tags_provider() {
        let config = ManagerConfig {
            provider: "gemini".to_string(),
            keys: vec!["a, b".to_string()],
            env_keys: vec!["GEMINI_API_KEY".to_string()],
            ..ManagerConfig::default()
        };
        let inputs = config.resolve_keys_with(|name| {
            (name == "GEMINI_API_KEY").then(|| "c,a".to_string())
        });

        let keys: Vec<&str> = inputs.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c", "a"]);
        assert!(inputs.iter().all(|i| i.provider == "gemini"));
    }

    #[test]
    fn test_state_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig {
            state_file: Some(dir.path().join("state.json")),
            ..ManagerConfig::default()
        };
        let storage = config.storage().unwrap().unwrap();
        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap(), Some("v".to_string()));
        assert!(ManagerConfig::default().storage().unwrap().is_none());
    }
}
