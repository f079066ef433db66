//! # 日志配置模块
//!
//! 提供结构化日志宏、日志阶段/组件定义以及日志系统初始化

use std::env;
use std::fmt;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 日志所处的处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStage {
    /// 启动与状态恢复
    Startup,
    /// 密钥选择
    Scheduling,
    /// 请求执行
    Execution,
    /// 重试与降级
    Retry,
    /// 语义缓存
    Cache,
    /// 健康检查
    HealthCheck,
    /// 状态持久化
    Persistence,
}

impl fmt::Display for LogStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Startup => "startup",
            Self::Scheduling => "scheduling",
            Self::Execution => "execution",
            Self::Retry => "retry",
            Self::Cache => "cache",
            Self::HealthCheck => "health_check",
            Self::Persistence => "persistence",
        };
        f.write_str(s)
    }
}

/// 产生日志的组件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogComponent {
    /// 密钥池
    KeyPool,
    /// 选择策略
    Selector,
    /// 错误分类器
    Classifier,
    /// 请求编排器
    Manager,
    /// 并发舱壁
    Bulkhead,
    /// 语义缓存
    SemanticCache,
    /// 持久化存储
    Storage,
    /// 健康检查器
    HealthChecker,
    /// 服务商注册表
    Registry,
    /// 配置加载
    Config,
}

impl fmt::Display for LogComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::KeyPool => "key_pool",
            Self::Selector => "selector",
            Self::Classifier => "classifier",
            Self::Manager => "manager",
            Self::Bulkhead => "bulkhead",
            Self::SemanticCache => "semantic_cache",
            Self::Storage => "storage",
            Self::HealthChecker => "health_checker",
            Self::Registry => "registry",
            Self::Config => "config",
        };
        f.write_str(s)
    }
}

/// 结构化 debug 日志
///
/// 参数依次为：请求ID、阶段、组件、操作名、描述，之后是可选的 tracing 字段。
#[macro_export]
macro_rules! ldebug {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr $(, $($fields:tt)*)?) => {
        ::tracing::debug!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($($fields)*,)?
            "{}",
            $description
        )
    };
}

/// 结构化 info 日志
#[macro_export]
macro_rules! linfo {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr $(, $($fields:tt)*)?) => {
        ::tracing::info!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($($fields)*,)?
            "{}",
            $description
        )
    };
}

/// 结构化 warn 日志
#[macro_export]
macro_rules! lwarn {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr $(, $($fields:tt)*)?) => {
        ::tracing::warn!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($($fields)*,)?
            "{}",
            $description
        )
    };
}

/// 结构化 error 日志
#[macro_export]
macro_rules! lerror {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr $(, $($fields:tt)*)?) => {
        ::tracing::error!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($($fields)*,)?
            "{}",
            $description
        )
    };
}

/// 脱敏显示密钥，只保留最后四位
#[must_use]
pub fn mask_key(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{tail}")
}

/// 初始化日志系统
///
/// `RUST_LOG` 存在时优先使用，否则使用传入级别。重复初始化会被忽略。
pub fn init_logging(log_level: Option<&str>) {
    let level = log_level.unwrap_or("info");
    let default_filter = format!("{level},api_key_manager=debug");

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init();

    if result.is_ok() && env::var("RUST_LOG").is_err() {
        tracing::debug!("Logging initialized with default filter");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_key_keeps_last_four() {
        assert_eq!(mask_key("sk-abcdef123456"), "...3456");
        assert_eq!(mask_key("ab"), "...ab");
        assert_eq!(mask_key(""), "...");
    }

    #[test]
    fn test_stage_and_component_display() {
        assert_eq!(LogStage::HealthCheck.to_string(), "health_check");
        assert_eq!(LogComponent::SemanticCache.to_string(), "semantic_cache");
    }

    #[test]
    fn test_macros_expand_with_and_without_fields() {
        init_logging(Some("debug"));
        crate::ldebug!("system", LogStage::Startup, LogComponent::Config, "noop", "no fields");
        crate::linfo!(
            "req-1",
            LogStage::Execution,
            LogComponent::Manager,
            "with_fields",
            "with fields",
            attempt = 1,
            key = %mask_key("secret-key")
        );
    }
}
