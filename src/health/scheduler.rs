//! # 健康检查调度器
//!
//! 按固定间隔对所有非 DEAD 密钥执行探测，结果与普通调用一样记录到密钥池

use super::probe::HealthProbe;
use crate::error::{ManagerError, Result};
use crate::key_pool::{ErrorClassifier, KeyPool, PoolEvent};
use crate::logging::{LogComponent, LogStage, mask_key};
use crate::{ldebug, linfo};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;

/// 默认检查间隔
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(300);

/// 一轮检查的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HealthCheckReport {
    /// 检查的密钥数
    pub checked: usize,
    /// 通过数
    pub passed: usize,
    /// 失败数
    pub failed: usize,
}

struct HealthChecker {
    pool: Arc<KeyPool>,
    probe: Arc<dyn HealthProbe>,
    classifier: ErrorClassifier,
}

impl HealthChecker {
    async fn run_round(&self) -> HealthCheckReport {
        let keys: Vec<String> = self
            .pool
            .key_states()
            .into_iter()
            .filter(|state| !state.is_dead())
            .map(|state| state.key)
            .collect();

        let mut report = HealthCheckReport {
            checked: keys.len(),
            ..HealthCheckReport::default()
        };

        for key in keys {
            let started = Instant::now();
            match self.probe.check(&key).await {
                Ok(()) => {
                    self.pool.mark_success(&key, Some(started.elapsed()));
                    self.pool
                        .events()
                        .emit(&PoolEvent::HealthCheckPassed { key });
                    report.passed += 1;
                }
                Err(e) => {
                    let classification = self.classifier.classify(&e, None);
                    self.pool.mark_failed(&key, &classification);
                    self.pool.events().emit(&PoolEvent::HealthCheckFailed {
                        key: key.clone(),
                        error: e.to_string(),
                    });
                    ldebug!(
                        "system",
                        LogStage::HealthCheck,
                        LogComponent::HealthChecker,
                        "probe_failed",
                        "Health probe failed",
                        key = %mask_key(&key),
                        kind = %classification.kind
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// 健康检查调度器
pub struct HealthCheckScheduler {
    checker: Arc<HealthChecker>,
    check_interval: Duration,
    main_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for HealthCheckScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckScheduler")
            .field("probe", &self.checker.probe.name())
            .field("check_interval", &self.check_interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl HealthCheckScheduler {
    /// 创建调度器，`check_interval` 为空时使用默认间隔
    #[must_use]
    pub fn new(
        pool: Arc<KeyPool>,
        probe: Arc<dyn HealthProbe>,
        check_interval: Option<Duration>,
    ) -> Self {
        let classifier = ErrorClassifier::new(*pool.circuit_breaker_config());
        Self {
            checker: Arc::new(HealthChecker {
                pool,
                probe,
                classifier,
            }),
            check_interval: check_interval.unwrap_or(DEFAULT_HEALTH_CHECK_INTERVAL),
            main_task: None,
        }
    }

    /// 检查间隔
    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// 是否正在运行
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.main_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// 立即执行一轮检查
    pub async fn run_once(&self) -> HealthCheckReport {
        self.checker.run_round().await
    }

    /// 启动周期检查，第一轮在一个间隔之后执行
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(ManagerError::health_check("Health check scheduler already running"));
        }
        if self.check_interval.is_zero() {
            return Err(ManagerError::health_check("Health check interval must be non-zero"));
        }

        let checker = Arc::clone(&self.checker);
        let period = self.check_interval;
        let task = tokio::spawn(async move {
            let mut ticks = IntervalStream::new(interval_at(Instant::now() + period, period));
            while ticks.next().await.is_some() {
                let report = checker.run_round().await;
                ldebug!(
                    "system",
                    LogStage::HealthCheck,
                    LogComponent::HealthChecker,
                    "health_round",
                    "Health check round finished",
                    checked = report.checked,
                    passed = report.passed,
                    failed = report.failed
                );
            }
        });

        self.main_task = Some(task);
        linfo!(
            "system",
            LogStage::HealthCheck,
            LogComponent::HealthChecker,
            "scheduler_started",
            "Health check scheduler started",
            interval_secs = period.as_secs()
        );
        Ok(())
    }

    /// 停止周期检查
    pub fn stop(&mut self) {
        if let Some(task) = self.main_task.take() {
            task.abort();
            linfo!(
                "system",
                LogStage::HealthCheck,
                LogComponent::HealthChecker,
                "scheduler_stopped",
                "Health check scheduler stopped"
            );
        }
    }
}

impl Drop for HealthCheckScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.main_task.take() {
            task.abort();
        }
    }
}
