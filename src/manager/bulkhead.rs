//! # 并发舱壁
//!
//! 在途请求数达到上限时立即拒绝，不排队。许可在释放（drop）时归还。

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 并发舱壁
#[derive(Debug, Clone)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    max_concurrency: Option<usize>,
}

impl Bulkhead {
    /// 创建舱壁，`None` 表示不限制
    #[must_use]
    pub fn new(max_concurrency: Option<usize>) -> Self {
        // 不限制时使用信号量允许的最大许可数
        let capacity = max_concurrency
            .map_or(Semaphore::MAX_PERMITS, |max| max.min(Semaphore::MAX_PERMITS));
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            max_concurrency,
        }
    }

    /// 并发上限
    #[must_use]
    pub const fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }

    /// 当前在途数
    #[must_use]
    pub fn active(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// 尝试获取许可，已满时返回 `None`
    #[must_use]
    pub fn try_acquire(&self) -> Option<BulkheadPermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| BulkheadPermit { _permit: permit })
    }
}

/// 舱壁许可
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}
