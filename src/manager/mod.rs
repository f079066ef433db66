//! # 请求编排模块
//!
//! 把密钥池、错误分类、舱壁、退避重试、降级与语义缓存组合成一次受管调用

pub mod backoff;
pub mod bulkhead;
pub mod executor;
pub mod options;
pub mod stream;

pub use backoff::{BASE_BACKOFF_MS, MAX_BACKOFF_MS, MAX_JITTER_MS, calculate_backoff, capped_backoff};
pub use bulkhead::{Bulkhead, BulkheadPermit};
pub use executor::{ApiKeyManager, CACHE_HIT_KEY};
pub use options::{EmbeddingFn, ExecuteOptions, FallbackFn, ManagerOptions, SemanticCacheOptions};
