//! # 编排器选项

use crate::cache::SemanticCacheConfig;
use crate::key_pool::{
    CircuitBreakerConfig, FinishReason, KeySelector, PoolEventListener, SelectionStrategy,
    create_key_selector,
};
use crate::persistence::StorageAdapter;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// 嵌入函数：提示词 -> 向量
pub type EmbeddingFn = Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<Vec<f32>>> + Send + Sync>;

/// 降级函数
pub type FallbackFn<T> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// 语义缓存选项
#[derive(Clone)]
pub struct SemanticCacheOptions {
    /// 缓存参数
    pub config: SemanticCacheConfig,
    /// 嵌入函数
    pub embedding: EmbeddingFn,
}

impl SemanticCacheOptions {
    /// 使用给定嵌入函数创建
    pub fn new<F, Fut>(config: SemanticCacheConfig, embedding: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<f32>>> + Send + 'static,
    {
        Self {
            config,
            embedding: Arc::new(move |prompt| Box::pin(embedding(prompt))),
        }
    }
}

impl std::fmt::Debug for SemanticCacheOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticCacheOptions")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// 管理器构造选项
pub struct ManagerOptions<T> {
    /// 选择器
    pub selector: Arc<dyn KeySelector>,
    /// 熔断参数
    pub circuit_breaker: CircuitBreakerConfig,
    /// 持久化存储
    pub storage: Option<Arc<dyn StorageAdapter>>,
    /// 降级函数
    pub fallback: Option<FallbackFn<T>>,
    /// 并发上限，`None` 表示不限制
    pub max_concurrency: Option<usize>,
    /// 语义缓存
    pub semantic_cache: Option<SemanticCacheOptions>,
    /// 事件监听者
    pub listeners: Vec<Arc<dyn PoolEventListener>>,
}

impl<T> Default for ManagerOptions<T> {
    fn default() -> Self {
        Self {
            selector: create_key_selector(SelectionStrategy::Standard),
            circuit_breaker: CircuitBreakerConfig::default(),
            storage: None,
            fallback: None,
            max_concurrency: None,
            semantic_cache: None,
            listeners: Vec::new(),
        }
    }
}

impl<T> ManagerOptions<T> {
    /// 使用内置策略
    #[must_use]
    pub fn with_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.selector = create_key_selector(strategy);
        self
    }

    /// 使用自定义选择器
    #[must_use]
    pub fn with_selector(mut self, selector: Arc<dyn KeySelector>) -> Self {
        self.selector = selector;
        self
    }

    /// 设置熔断参数
    #[must_use]
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// 设置持久化存储
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// 设置降级函数
    #[must_use]
    pub fn with_fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.fallback = Some(Arc::new(move || Box::pin(fallback())));
        self
    }

    /// 设置并发上限
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    /// 启用语义缓存
    #[must_use]
    pub fn with_semantic_cache(mut self, options: SemanticCacheOptions) -> Self {
        self.semantic_cache = Some(options);
        self
    }

    /// 追加事件监听者
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn PoolEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}

/// 单次执行选项
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// 单次尝试的超时
    pub timeout: Option<Duration>,
    /// 最大重试次数，0 表示只尝试一次
    pub max_retries: u32,
    /// 服务商给出的结束原因
    pub finish_reason: Option<FinishReason>,
    /// 只在该服务商的密钥中选择
    pub provider: Option<String>,
    /// 语义缓存的查找文本
    pub prompt: Option<String>,
}

impl ExecuteOptions {
    /// 默认选项
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置超时
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 设置最大重试次数
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 设置结束原因
    #[must_use]
    pub fn finish_reason(mut self, finish_reason: FinishReason) -> Self {
        self.finish_reason = Some(finish_reason);
        self
    }

    /// 限定服务商
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// 设置缓存查找文本
    #[must_use]
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}
