//! # 服务商预设
//!
//! 预设固定了常用服务商的环境变量名与默认参数：延迟优先策略、
//! 并发上限 20、每个服务商一个状态文件（启动时清空）。

use crate::config::{ManagerConfig, parse_keys_with};
use crate::error::Result;
use crate::key_pool::{KeyInput, SelectionStrategy, TracingEventListener};
use crate::logging::{LogComponent, LogStage};
use crate::lwarn;
use crate::manager::{ApiKeyManager, ManagerOptions};
use crate::persistence::FileStorage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// 预设的默认并发上限
pub const PRESET_MAX_CONCURRENCY: usize = 20;

/// 预设的默认健康检查间隔
pub const PRESET_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(300);

/// 服务商预设
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPreset {
    /// 服务商标签
    pub provider: String,
    /// 读取密钥的环境变量名，按顺序合并
    pub env_keys: Vec<String>,
    /// 选择策略
    pub strategy: SelectionStrategy,
    /// 并发上限
    pub max_concurrency: usize,
    /// 健康检查间隔
    pub health_check_interval: Duration,
    /// 状态文件
    pub state_file: PathBuf,
    /// 启动时清空状态文件
    pub clear_state_on_init: bool,
}

impl ProviderPreset {
    /// 自定义服务商预设
    pub fn custom<S: Into<String>>(provider: impl Into<String>, env_keys: impl IntoIterator<Item = S>) -> Self {
        let provider = provider.into();
        Self {
            state_file: FileStorage::default_path(&provider),
            provider,
            env_keys: env_keys.into_iter().map(Into::into).collect(),
            strategy: SelectionStrategy::Latency,
            max_concurrency: PRESET_MAX_CONCURRENCY,
            health_check_interval: PRESET_HEALTH_CHECK_INTERVAL,
            clear_state_on_init: true,
        }
    }

    /// Gemini
    #[must_use]
    pub fn gemini() -> Self {
        Self::custom("gemini", ["GOOGLE_GEMINI_API_KEY", "GEMINI_API_KEY"])
    }

    /// `OpenAI`
    #[must_use]
    pub fn openai() -> Self {
        Self::custom("openai", ["OPENAI_API_KEY"])
    }

    /// 修改状态文件路径
    #[must_use]
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = path.into();
        self
    }

    /// 从进程环境变量读取密钥
    #[must_use]
    pub fn resolve_keys(&self) -> Vec<KeyInput> {
        self.resolve_keys_with(|name| std::env::var(name).ok())
    }

    /// 使用给定查找函数读取密钥，每个密钥带上服务商标签
    pub fn resolve_keys_with<F>(&self, lookup: F) -> Vec<KeyInput>
    where
        F: Fn(&str) -> Option<String>,
    {
        let keys = parse_keys_with(self.env_keys.as_slice(), lookup);
        if keys.is_empty() {
            lwarn!(
                "system",
                LogStage::Startup,
                LogComponent::Registry,
                "no_keys_found",
                "No API keys found in environment",
                provider = %self.provider,
                variables = %self.env_keys.join(", ")
            );
        }
        keys.into_iter()
            .map(|key| KeyInput::new(key).with_provider(self.provider.as_str()))
            .collect()
    }

    /// 等价的管理器配置
    #[must_use]
    pub fn to_config(&self) -> ManagerConfig {
        ManagerConfig {
            provider: self.provider.clone(),
            env_keys: self.env_keys.clone(),
            strategy: self.strategy,
            max_concurrency: Some(self.max_concurrency),
            state_file: Some(self.state_file.clone()),
            clear_state_on_init: self.clear_state_on_init,
            health_check_interval_secs: self.health_check_interval.as_secs(),
            ..ManagerConfig::default()
        }
    }

    /// 预设的管理器选项，调用方可继续追加降级、缓存或监听者
    pub fn options<T>(&self) -> Result<ManagerOptions<T>> {
        let options = self
            .to_config()
            .manager_options(None)?
            .with_listener(Arc::new(TracingEventListener::new(self.provider.as_str())));
        Ok(options)
    }

    /// 使用环境变量中的密钥和预设选项创建管理器
    pub fn build<T>(&self) -> Result<ApiKeyManager<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.build_with(self.resolve_keys(), self.options()?)
    }

    /// 使用给定密钥和选项创建管理器，密钥统一打上本预设的服务商标签
    pub fn build_with<T>(&self, keys: Vec<KeyInput>, options: ManagerOptions<T>) -> Result<ApiKeyManager<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let keys: Vec<KeyInput> = keys
            .into_iter()
            .map(|input| input.with_provider(self.provider.as_str()))
            .collect();
        Ok(ApiKeyManager::new(keys, options))
    }
}
