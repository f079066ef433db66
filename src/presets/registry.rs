//! # 服务商注册表
//!
//! 每个服务商对应一个管理器，由调用方显式持有注册表，
//! 取代进程级单例。

use super::preset::ProviderPreset;
use crate::error::{ExecuteError, Result};
use crate::key_pool::UpstreamError;
use crate::linfo;
use crate::logging::{LogComponent, LogStage};
use crate::manager::{ApiKeyManager, ExecuteOptions};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::stream::{BoxStream, Stream};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// 按服务商索引的管理器注册表
pub struct PoolRegistry<T> {
    managers: DashMap<String, ApiKeyManager<T>>,
}

impl<T> Default for PoolRegistry<T> {
    fn default() -> Self {
        Self {
            managers: DashMap::new(),
        }
    }
}

impl<T> std::fmt::Debug for PoolRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("providers", &self.managers.len())
            .finish()
    }
}

impl<T> PoolRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// 创建空注册表
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册管理器，返回被替换的旧管理器
    pub fn register(
        &self,
        provider: impl Into<String>,
        manager: ApiKeyManager<T>,
    ) -> Option<ApiKeyManager<T>> {
        self.managers.insert(provider.into(), manager)
    }

    /// 获取已有管理器，不存在时用 `factory` 创建
    ///
    /// `factory` 执行期间持有该服务商所在分片的锁，不能再访问注册表。
    pub fn get_or_create<F>(&self, provider: &str, factory: F) -> Result<ApiKeyManager<T>>
    where
        F: FnOnce() -> Result<ApiKeyManager<T>>,
    {
        match self.managers.entry(provider.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let manager = factory()?;
                entry.insert(manager.clone());
                linfo!(
                    "system",
                    LogStage::Startup,
                    LogComponent::Registry,
                    "manager_created",
                    "Provider manager initialized",
                    provider = provider,
                    keys = manager.pool().len()
                );
                Ok(manager)
            }
        }
    }

    /// 按预设获取或创建管理器
    pub fn get_or_create_preset(&self, preset: &ProviderPreset) -> Result<ApiKeyManager<T>> {
        self.get_or_create(&preset.provider, || preset.build())
    }

    /// 获取管理器
    #[must_use]
    pub fn get(&self, provider: &str) -> Option<ApiKeyManager<T>> {
        self.managers.get(provider).map(|entry| entry.value().clone())
    }

    /// 移除管理器
    pub fn remove(&self, provider: &str) -> Option<ApiKeyManager<T>> {
        self.managers.remove(provider).map(|(_, manager)| manager)
    }

    /// 清空注册表
    pub fn clear(&self) {
        self.managers.clear();
    }

    /// 已注册的服务商，按名称排序
    #[must_use]
    pub fn providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self.managers.iter().map(|e| e.key().clone()).collect();
        providers.sort();
        providers
    }

    /// 服务商数量
    #[must_use]
    pub fn len(&self) -> usize {
        self.managers.len()
    }

    /// 是否为空
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// 从指定服务商的池中取一个密钥，服务商未注册时返回 `None`
    #[must_use]
    pub fn get_key(&self, provider: &str) -> Option<String> {
        self.get(provider)?.get_key_by_provider(provider)
    }

    fn route<E>(&self, options: &ExecuteOptions) -> std::result::Result<ApiKeyManager<T>, ExecuteError<E>> {
        options
            .provider
            .as_deref()
            .and_then(|provider| self.get(provider))
            .ok_or_else(|| ExecuteError::UnknownProvider {
                provider: options.provider.clone(),
            })
    }

    /// 按 `options.provider` 路由执行
    pub async fn execute<F, Fut, E>(
        &self,
        operation: F,
        options: ExecuteOptions,
    ) -> std::result::Result<T, ExecuteError<E>>
    where
        F: Fn(String, CancellationToken) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: UpstreamError,
    {
        let manager = self.route(&options)?;
        manager.execute(operation, options).await
    }

    /// 按 `options.provider` 路由流式执行
    pub async fn execute_stream<F, Fut, S, E>(
        &self,
        operation: F,
        options: ExecuteOptions,
    ) -> std::result::Result<BoxStream<'static, std::result::Result<T, E>>, ExecuteError<E>>
    where
        F: Fn(String, CancellationToken) -> Fut,
        Fut: Future<Output = std::result::Result<S, E>>,
        S: Stream<Item = std::result::Result<T, E>> + Send + 'static,
        E: UpstreamError + Send + 'static,
    {
        let manager = self.route(&options)?;
        manager.execute_stream(operation, options).await
    }
}
