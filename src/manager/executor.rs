//! # 请求编排器
//!
//! 缓存检查 -> 舱壁准入 -> 选择密钥 -> 带超时调用 -> 分类记录 -> 退避重试 -> 降级

use super::backoff::calculate_backoff;
use super::bulkhead::{Bulkhead, BulkheadPermit};
use super::options::{EmbeddingFn, ExecuteOptions, FallbackFn, ManagerOptions};
use crate::cache::{CacheStats, CachedResponse, SemanticCache};
use crate::error::{ExecuteError, ManagerError};
use crate::key_pool::{
    ErrorClassification, ErrorClassifier, EventDispatcher, FallbackReason, FinishReason, KeyInput,
    KeyPool, PoolEvent, PoolStats, TimeoutError, UpstreamError,
};
use crate::logging::{LogComponent, LogStage, mask_key};
use crate::{ldebug, linfo, lwarn};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

tokio::task_local! {
    /// 嵌入计算进行中，嵌套的 execute 跳过缓存检查
    static RESOLVING_EMBEDDING: bool;
}

/// 缓存命中时 execute-succeeded 通知使用的密钥名
pub const CACHE_HIT_KEY: &str = "CACHE_HIT";

/// 重试循环的结果
pub(super) enum Outcome<R, T> {
    /// 某次尝试成功
    Live(R),
    /// 降级函数的结果
    Fallback(T),
}

/// 单次尝试的失败
enum AttemptError<E> {
    Operation(E),
    Timeout(TimeoutError),
}

impl<E: UpstreamError> AttemptError<E> {
    fn classify(&self, classifier: &ErrorClassifier, finish_reason: Option<FinishReason>) -> ErrorClassification {
        match self {
            Self::Operation(error) => classifier.classify(error, finish_reason),
            Self::Timeout(error) => classifier.classify(error, finish_reason),
        }
    }

    fn into_execute_error(self) -> ExecuteError<E> {
        match self {
            Self::Operation(error) => ExecuteError::Operation(error),
            Self::Timeout(error) => ExecuteError::Timeout {
                timeout_ms: error.timeout_ms,
            },
        }
    }
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation(error) => write!(f, "{error}"),
            Self::Timeout(error) => write!(f, "{error}"),
        }
    }
}

pub(super) struct ManagerInner<T> {
    pub(super) pool: Arc<KeyPool>,
    pub(super) classifier: ErrorClassifier,
    pub(super) events: EventDispatcher,
    pub(super) fallback: Option<FallbackFn<T>>,
    pub(super) bulkhead: Bulkhead,
    pub(super) cache: Option<SemanticCache<CachedResponse<T>>>,
    pub(super) embedding: Option<EmbeddingFn>,
}

/// API密钥管理器
///
/// 克隆开销很小，所有克隆共享同一个密钥池、舱壁与缓存。
pub struct ApiKeyManager<T> {
    pub(super) inner: Arc<ManagerInner<T>>,
}

impl<T> Clone for ApiKeyManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ApiKeyManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyManager")
            .field("pool", &self.inner.pool)
            .field("max_concurrency", &self.inner.bulkhead.max_concurrency())
            .field("fallback", &self.inner.fallback.is_some())
            .field("semantic_cache", &self.inner.cache.is_some())
            .finish()
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl<T> ApiKeyManager<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// 创建管理器
    pub fn new<I, K>(keys: I, options: ManagerOptions<T>) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyInput>,
    {
        let events = EventDispatcher::new(options.listeners);

        let mut builder = KeyPool::builder()
            .keys(keys)
            .selector(options.selector)
            .circuit_breaker(options.circuit_breaker)
            .events(events.clone());
        if let Some(storage) = options.storage {
            builder = builder.storage(storage);
        }
        let pool = Arc::new(builder.build());

        let (cache, embedding) = match options.semantic_cache {
            Some(cache_options) => (
                Some(SemanticCache::new(cache_options.config)),
                Some(cache_options.embedding),
            ),
            None => (None, None),
        };

        Self {
            inner: Arc::new(ManagerInner {
                pool,
                classifier: ErrorClassifier::new(options.circuit_breaker),
                events,
                fallback: options.fallback,
                bulkhead: Bulkhead::new(options.max_concurrency),
                cache,
                embedding,
            }),
        }
    }

    /// 底层密钥池
    #[must_use]
    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.inner.pool
    }

    /// 错误分类器
    #[must_use]
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.inner.classifier
    }

    /// 事件分发器
    #[must_use]
    pub fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    /// 选择一个可用密钥
    pub fn get_key(&self) -> Option<String> {
        self.inner.pool.get_key()
    }

    /// 在指定服务商内选择密钥
    pub fn get_key_by_provider(&self, provider: &str) -> Option<String> {
        self.inner.pool.get_key_by_provider(provider)
    }

    /// 记录成功
    pub fn mark_success(&self, key: &str, duration: Option<Duration>) {
        self.inner.pool.mark_success(key, duration);
    }

    /// 记录失败
    pub fn mark_failed(&self, key: &str, classification: &ErrorClassification) {
        self.inner.pool.mark_failed(key, classification);
    }

    /// 使用本管理器的熔断参数分类错误
    pub fn classify_error(
        &self,
        error: &(impl UpstreamError + ?Sized),
        finish_reason: Option<FinishReason>,
    ) -> ErrorClassification {
        self.inner.classifier.classify(error, finish_reason)
    }

    /// 密钥池统计
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// 语义缓存统计，未启用缓存时为 `None`
    #[must_use]
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.inner.cache.as_ref().map(SemanticCache::stats)
    }

    /// 当前在途请求数
    #[must_use]
    pub fn active_calls(&self) -> usize {
        self.inner.bulkhead.active()
    }

    /// 执行一次受管调用
    ///
    /// `operation` 接收选中的密钥与取消令牌；超时后令牌被取消。
    pub async fn execute<F, Fut, E>(
        &self,
        operation: F,
        options: ExecuteOptions,
    ) -> Result<T, ExecuteError<E>>
    where
        F: Fn(String, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: UpstreamError,
    {
        let vector = self.embed_prompt(options.prompt.as_deref()).await;
        if let Some(vector) = &vector
            && let Some(cache) = &self.inner.cache
            && let Some(CachedResponse::Value(hit)) =
                cache.lookup(vector, |cached| matches!(cached, CachedResponse::Value(_)))
        {
            self.emit_cache_hit();
            return Ok(hit);
        }

        let _permit = self.admit::<E>()?;
        match self.run_attempts(operation, &options).await? {
            Outcome::Live(value) => {
                self.store_in_cache(
                    options.prompt.as_deref(),
                    vector,
                    CachedResponse::Value(value.clone()),
                );
                Ok(value)
            }
            Outcome::Fallback(value) => Ok(value),
        }
    }

    /// 舱壁准入，拒绝时通知 bulkhead-rejected
    pub(super) fn admit<E>(&self) -> Result<BulkheadPermit, ExecuteError<E>> {
        self.inner.bulkhead.try_acquire().ok_or_else(|| {
            self.inner.events.emit(&PoolEvent::BulkheadRejected);
            ExecuteError::BulkheadRejected {
                max_concurrency: self.inner.bulkhead.max_concurrency().unwrap_or(usize::MAX),
            }
        })
    }

    /// 计算提示词向量；未启用缓存、没有提示词、处于嵌入计算内部或计算失败时返回 `None`
    pub(super) async fn embed_prompt(&self, prompt: Option<&str>) -> Option<Vec<f32>> {
        let prompt = prompt?;
        self.inner.cache.as_ref()?;
        let embedding = self.inner.embedding.as_ref()?;

        if RESOLVING_EMBEDDING.try_with(|resolving| *resolving).unwrap_or(false) {
            ldebug!(
                "system",
                LogStage::Cache,
                LogComponent::SemanticCache,
                "skip_nested_lookup",
                "Nested call inside embedding computation, bypassing cache"
            );
            return None;
        }

        let resolved = RESOLVING_EMBEDDING
            .scope(true, embedding(prompt.to_string()))
            .await;
        match checked_embedding(resolved) {
            Ok(vector) => Some(vector),
            Err(e) => {
                lwarn!(
                    "system",
                    LogStage::Cache,
                    LogComponent::SemanticCache,
                    "cache_check_failed",
                    "Semantic cache check failed, proceeding to live API",
                    error = %e
                );
                None
            }
        }
    }

    pub(super) fn emit_cache_hit(&self) {
        linfo!(
            "system",
            LogStage::Cache,
            LogComponent::SemanticCache,
            "cache_hit",
            "Serving response from semantic cache"
        );
        self.inner.events.emit(&PoolEvent::ExecuteSucceeded {
            key: CACHE_HIT_KEY.to_string(),
            duration: Duration::ZERO,
        });
    }

    pub(super) fn store_in_cache(
        &self,
        prompt: Option<&str>,
        vector: Option<Vec<f32>>,
        value: CachedResponse<T>,
    ) {
        if let (Some(cache), Some(prompt), Some(vector)) = (&self.inner.cache, prompt, vector) {
            cache.set(prompt, vector, value);
        }
    }

    async fn invoke_fallback<E>(
        &self,
        fallback: &FallbackFn<T>,
        reason: FallbackReason,
    ) -> Result<T, ExecuteError<E>> {
        self.inner
            .events
            .emit(&PoolEvent::FallbackInvoked { reason });
        fallback().await.map_err(ExecuteError::Fallback)
    }

    async fn attempt_once<R, E, A, AF>(
        attempt_fn: &A,
        key: String,
        timeout: Option<Duration>,
    ) -> Result<R, AttemptError<E>>
    where
        A: Fn(String, CancellationToken) -> AF,
        AF: Future<Output = Result<R, E>>,
    {
        let token = CancellationToken::new();
        let call = attempt_fn(key, token.clone());

        match timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result.map_err(AttemptError::Operation),
                Err(_) => {
                    token.cancel();
                    Err(AttemptError::Timeout(TimeoutError {
                        timeout_ms: duration_millis(limit),
                    }))
                }
            },
            None => call.await.map_err(AttemptError::Operation),
        }
    }

    /// 重试循环
    ///
    /// 不可重试的失败立即返回；重试次数耗尽时若配置了降级则调用降级。
    pub(super) async fn run_attempts<R, E, A, AF>(
        &self,
        attempt_fn: A,
        options: &ExecuteOptions,
    ) -> Result<Outcome<R, T>, ExecuteError<E>>
    where
        A: Fn(String, CancellationToken) -> AF,
        AF: Future<Output = Result<R, E>>,
        E: UpstreamError,
    {
        let pool = &self.inner.pool;
        let mut attempt: u32 = 0;

        loop {
            let selected = match options.provider.as_deref() {
                Some(provider) => pool.get_key_by_provider(provider),
                None => pool.get_key(),
            };

            let Some(key) = selected else {
                return match &self.inner.fallback {
                    Some(fallback) => self
                        .invoke_fallback(fallback, FallbackReason::Exhausted)
                        .await
                        .map(Outcome::Fallback),
                    None => Err(ExecuteError::AllKeysExhausted),
                };
            };

            let started = Instant::now();
            match Self::attempt_once(&attempt_fn, key.clone(), options.timeout).await {
                Ok(value) => {
                    let elapsed = started.elapsed();
                    pool.mark_success(&key, Some(elapsed));
                    self.inner.events.emit(&PoolEvent::ExecuteSucceeded {
                        key,
                        duration: elapsed,
                    });
                    return Ok(Outcome::Live(value));
                }
                Err(error) => {
                    let classification = error.classify(&self.inner.classifier, options.finish_reason);
                    pool.mark_failed(&key, &classification);
                    self.inner.events.emit(&PoolEvent::ExecuteFailed {
                        key: key.clone(),
                        error: error.to_string(),
                    });

                    let out_of_attempts = attempt >= options.max_retries;
                    if !classification.retryable || out_of_attempts {
                        if out_of_attempts && let Some(fallback) = &self.inner.fallback {
                            return self
                                .invoke_fallback(fallback, FallbackReason::MaxRetries)
                                .await
                                .map(Outcome::Fallback);
                        }
                        return Err(error.into_execute_error());
                    }

                    let delay = calculate_backoff(attempt);
                    attempt += 1;
                    ldebug!(
                        "system",
                        LogStage::Retry,
                        LogComponent::Manager,
                        "schedule_retry",
                        "Scheduling retry after backoff",
                        key = %mask_key(&key),
                        kind = %classification.kind,
                        attempt = attempt,
                        delay_ms = duration_millis(delay)
                    );
                    self.inner.events.emit(&PoolEvent::RetryAttempted {
                        key,
                        attempt,
                        delay,
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// 校验嵌入结果，失败或空向量归为缓存错误
fn checked_embedding(resolved: anyhow::Result<Vec<f32>>) -> Result<Vec<f32>, ManagerError> {
    let vector = resolved.map_err(|e| ManagerError::cache_with_source("嵌入计算失败", e))?;
    if vector.is_empty() {
        return Err(ManagerError::cache("嵌入向量为空"));
    }
    Ok(vector)
}
