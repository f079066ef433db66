//! # 错误处理测试

use crate::error::{Context, ExecuteError, ExecuteErrorKind, ManagerError};
use std::error::Error;

#[test]
fn test_config_error_creation() {
    let err = ManagerError::config("测试配置错误");
    assert!(matches!(err, ManagerError::Config { .. }));
    assert_eq!(err.to_string(), "配置错误: 测试配置错误");
}

#[test]
fn test_persistence_error_with_source() {
    let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "权限不足");
    let err = ManagerError::persistence_with_source("写入状态文件失败", io_err);

    assert!(matches!(err, ManagerError::Persistence { .. }));
    assert!(err.to_string().contains("持久化错误: 写入状态文件失败"));
    assert!(err.source().is_some());
}

#[test]
fn test_context_trait_wraps_source() {
    let result: Result<(), std::io::Error> = Err(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "文件不存在",
    ));

    let err = result.context("读取配置文件失败").unwrap_err();
    assert!(matches!(err, ManagerError::Context { .. }));
    assert_eq!(err.to_string(), "读取配置文件失败");
    let source = err.source().unwrap();
    assert!(source.to_string().contains("IO错误"));
}

#[test]
fn test_context_wraps_cache_error() {
    let result: Result<(), ManagerError> = Err(ManagerError::cache_with_source(
        "嵌入计算失败",
        anyhow::anyhow!("timeout"),
    ));
    let err = result.with_context(|| "语义缓存检查失败").unwrap_err();
    assert_eq!(err.to_string(), "语义缓存检查失败");
    let inner = err.source().unwrap();
    assert_eq!(inner.to_string(), "缓存错误: 嵌入计算失败");
    assert!(inner.source().is_some());
}

#[test]
fn test_auto_conversion_from_toml_error() {
    let toml_err = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
    let err: ManagerError = toml_err.into();

    assert!(matches!(err, ManagerError::Config { .. }));
    assert!(err.to_string().contains("配置错误: TOML解析失败"));
}

#[test]
fn test_auto_conversion_from_json_error() {
    let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err: ManagerError = json_err.into();
    assert!(matches!(err, ManagerError::Serialization { .. }));
}

#[test]
fn test_macros_build_expected_variants() {
    let err = crate::config_error!("阈值无效: {}", 1.5);
    assert_eq!(err.to_string(), "配置错误: 阈值无效: 1.5");

    let err = crate::persistence_error!("存储不可用");
    assert!(matches!(err, ManagerError::Persistence { .. }));

    fn check(value: usize) -> crate::error::Result<usize> {
        crate::ensure_config!(value > 0, "并发上限必须大于0");
        Ok(value)
    }
    assert!(check(0).is_err());
    assert_eq!(check(3).unwrap(), 3);
}

#[test]
fn test_execute_error_kinds() {
    let err: ExecuteError<std::io::Error> = ExecuteError::Timeout { timeout_ms: 100 };
    assert_eq!(err.kind(), ExecuteErrorKind::Timeout);
    assert!(err.is_timeout());
    assert_eq!(err.to_string(), "Request timed out after 100ms");

    let err: ExecuteError<std::io::Error> = ExecuteError::BulkheadRejected { max_concurrency: 2 };
    assert!(err.is_bulkhead_rejected());
    assert!(err.source().is_none());

    let err: ExecuteError<std::io::Error> = ExecuteError::AllKeysExhausted;
    assert!(err.is_exhausted());
    assert_eq!(err.kind().to_string(), "all_keys_exhausted");

    let err = ExecuteError::Operation(std::io::Error::other("boom"));
    assert_eq!(err.kind(), ExecuteErrorKind::Operation);
    assert!(err.source().is_some());
    assert_eq!(err.into_operation_error().unwrap().to_string(), "boom");
}
