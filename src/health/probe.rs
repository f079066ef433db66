//! # 健康探测

use async_trait::async_trait;
use std::future::Future;

/// 对单个密钥执行一次轻量探测
///
/// 返回的错误交给错误分类器，按普通调用失败的规则记录到密钥池。
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// 探测指定密钥
    async fn check(&self, key: &str) -> anyhow::Result<()>;

    /// 探测器名称
    fn name(&self) -> &'static str {
        "HealthProbe"
    }
}

/// 由异步函数构成的探测器
pub struct FnProbe<F> {
    probe: F,
}

impl<F> FnProbe<F> {
    /// 包装探测函数
    pub const fn new(probe: F) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn check(&self, key: &str) -> anyhow::Result<()> {
        (self.probe)(key.to_string()).await
    }

    fn name(&self) -> &'static str {
        "FnProbe"
    }
}
