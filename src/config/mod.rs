//! # 配置管理模块
//!
//! 处理管理器配置加载、验证以及环境变量中的密钥解析

mod env_keys;
mod manager_config;

pub use env_keys::{parse_keys_from_env, parse_keys_with};
pub use manager_config::{ManagerConfig, SemanticCacheSection};

use crate::error::{Context, Result};
use crate::linfo;
use crate::logging::{LogComponent, LogStage};
use std::path::Path;

/// 加载配置文件
pub fn load_config(path: impl AsRef<Path>) -> Result<ManagerConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = ManagerConfig::from_toml_str(&content)
        .with_context(|| format!("Invalid config file: {}", path.display()))?;

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Config,
        "config_loaded",
        "Configuration loaded",
        path = %path.display(),
        provider = %config.provider,
        strategy = %config.strategy
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "provider = \"gemini\"\nenv_keys = [\"GEMINI_API_KEY\"]").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.provider, "gemini");
        assert_eq!(config.env_keys, vec!["GEMINI_API_KEY".to_string()]);
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }
}
