//! # 密钥健康检查模块

pub mod probe;
pub mod scheduler;

pub use probe::{FnProbe, HealthProbe};
pub use scheduler::{DEFAULT_HEALTH_CHECK_INTERVAL, HealthCheckReport, HealthCheckScheduler};
