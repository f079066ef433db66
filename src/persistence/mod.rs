//! # 状态持久化
//!
//! 密钥池通过极简的 get/set 字符串接口保存和恢复状态。
//! 写入是尽力而为的，失败只记录日志，不影响请求路径。

use crate::error::{ManagerError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lwarn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// 持久化端口
#[cfg_attr(test, mockall::automock)]
pub trait StorageAdapter: Send + Sync {
    /// 读取指定名称的值，不存在时返回 `None`
    fn get(&self, name: &str) -> Result<Option<String>>;

    /// 写入指定名称的值
    fn set(&self, name: &str, value: &str) -> Result<()>;
}

/// 进程内存储
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    /// 创建空存储
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 清空全部数据
    pub fn clear(&self) {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// 条目数
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// 是否为空
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageAdapter for MemoryStorage {
    fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// 基于 JSON 文件的存储
///
/// 文件内容是一个 `{ name: value }` 对象，每次写入都会整体重写文件。
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    data: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    /// 打开文件存储
    ///
    /// `clear_on_init` 为真时删除已有文件，从空状态开始。
    /// 已有文件损坏时同样从空状态开始。
    pub fn new(path: impl Into<PathBuf>, clear_on_init: bool) -> Result<Self> {
        let path = path.into();

        if clear_on_init && path.exists() {
            fs::remove_file(&path).map_err(|e| {
                ManagerError::persistence_with_source(
                    format!("无法清理状态文件: {}", path.display()),
                    e,
                )
            })?;
        }

        let data = Self::load(&path);
        ldebug!(
            "system",
            LogStage::Persistence,
            LogComponent::Storage,
            "file_storage_open",
            "Opened file storage",
            path = %path.display(),
            entries = data.len(),
            cleared = clear_on_init
        );

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// 系统临时目录下的默认状态文件路径
    #[must_use]
    pub fn default_path(provider: &str) -> PathBuf {
        std::env::temp_dir().join(format!("api_key_manager_{provider}_state.json"))
    }

    /// 状态文件路径
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> HashMap<String, String> {
        let Ok(content) = fs::read_to_string(path) else {
            return HashMap::new();
        };

        match serde_json::from_str(&content) {
            Ok(data) => data,
            Err(e) => {
                lwarn!(
                    "system",
                    LogStage::Persistence,
                    LogComponent::Storage,
                    "file_storage_corrupt",
                    "State file is not valid JSON, starting empty",
                    path = %path.display(),
                    error = %e
                );
                HashMap::new()
            }
        }
    }

    fn flush(&self, data: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

impl StorageAdapter for FileStorage {
    fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        data.insert(name.to_string(), value.to_string());
        self.flush(&data)
    }
}
