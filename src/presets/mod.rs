//! # 服务商预设与注册表

pub mod preset;
pub mod registry;

pub use preset::{PRESET_HEALTH_CHECK_INTERVAL, PRESET_MAX_CONCURRENCY, ProviderPreset};
pub use registry::PoolRegistry;
