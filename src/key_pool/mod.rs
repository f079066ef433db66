//! # API密钥池模块
//!
//! 密钥记录与熔断状态机、错误分类、选择算法以及状态通知

pub mod algorithms;
pub mod classifier;
pub mod events;
pub mod pool_manager;
pub mod types;

pub use algorithms::{
    KeySelector, LatencyKeySelector, SelectionStrategy, StandardKeySelector, WeightedKeySelector,
    create_key_selector,
};
pub use classifier::{
    ApiError, ErrorClassification, ErrorClassifier, ErrorKind, FinishReason, TimeoutError,
    UpstreamError, classify_error, parse_retry_after,
};
pub use events::{EventDispatcher, FallbackReason, PoolEvent, PoolEventListener, TracingEventListener};
pub use pool_manager::{KeyPool, KeyPoolBuilder, STATE_STORAGE_KEY};
pub use types::{CircuitBreakerConfig, CircuitState, DEFAULT_PROVIDER, KeyInput, KeyState, PoolStats};
