//! # API Key Manager Library
//!
//! 多密钥轮换与熔断、错误分类、重试退避、并发舱壁、降级以及语义缓存

pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod key_pool;
pub mod logging;
pub mod manager;
pub mod persistence;
pub mod presets;

// Re-export commonly used types
pub use cache::{CacheStats, SemanticCache, SemanticCacheConfig};
pub use config::{ManagerConfig, load_config};
pub use error::{ExecuteError, ExecuteErrorKind, ManagerError, Result};
pub use health::{HealthCheckScheduler, HealthProbe};
pub use key_pool::{
    ApiError, CircuitBreakerConfig, CircuitState, ErrorClassification, ErrorKind, FinishReason,
    KeyInput, KeyPool, KeyState, PoolEvent, PoolEventListener, PoolStats, SelectionStrategy,
    classify_error,
};
pub use manager::{ApiKeyManager, ExecuteOptions, ManagerOptions, SemanticCacheOptions};
pub use persistence::{FileStorage, MemoryStorage, StorageAdapter};
pub use presets::{PoolRegistry, ProviderPreset};
