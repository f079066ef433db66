//! # 请求执行错误
//!
//! `execute` 对调用方可见的失败类型，按种类区分以便调用方分支处理

use std::fmt;

/// 执行失败的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecuteErrorKind {
    /// 调用方操作本身返回的错误
    Operation,
    /// 单次尝试超时
    Timeout,
    /// 并发舱壁拒绝
    BulkheadRejected,
    /// 密钥池耗尽
    AllKeysExhausted,
    /// 降级函数执行失败
    Fallback,
    /// 注册表中没有对应服务商
    UnknownProvider,
}

impl fmt::Display for ExecuteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Operation => "operation",
            Self::Timeout => "timeout",
            Self::BulkheadRejected => "bulkhead_rejected",
            Self::AllKeysExhausted => "all_keys_exhausted",
            Self::Fallback => "fallback",
            Self::UnknownProvider => "unknown_provider",
        };
        f.write_str(s)
    }
}

/// `execute` / `execute_stream` 的错误
///
/// `E` 是调用方操作的错误类型，原样透传给调用方。
#[derive(Debug)]
pub enum ExecuteError<E> {
    /// 重试耗尽且未配置降级时，最后一次操作的原始错误
    Operation(E),
    /// 最后一次尝试超时
    Timeout {
        /// 配置的超时时长（毫秒）
        timeout_ms: u64,
    },
    /// 在途请求数已达上限，立即拒绝
    BulkheadRejected {
        /// 配置的并发上限
        max_concurrency: usize,
    },
    /// 没有任何可用密钥
    AllKeysExhausted,
    /// 降级函数自身失败
    Fallback(anyhow::Error),
    /// 按服务商路由时找不到对应的管理器
    UnknownProvider {
        /// 请求的服务商
        provider: Option<String>,
    },
}

impl<E> ExecuteError<E> {
    /// 错误种类
    #[must_use]
    pub const fn kind(&self) -> ExecuteErrorKind {
        match self {
            Self::Operation(_) => ExecuteErrorKind::Operation,
            Self::Timeout { .. } => ExecuteErrorKind::Timeout,
            Self::BulkheadRejected { .. } => ExecuteErrorKind::BulkheadRejected,
            Self::AllKeysExhausted => ExecuteErrorKind::AllKeysExhausted,
            Self::Fallback(_) => ExecuteErrorKind::Fallback,
            Self::UnknownProvider { .. } => ExecuteErrorKind::UnknownProvider,
        }
    }

    /// 是否为超时
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// 是否为舱壁拒绝
    #[must_use]
    pub const fn is_bulkhead_rejected(&self) -> bool {
        matches!(self, Self::BulkheadRejected { .. })
    }

    /// 是否为密钥池耗尽
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::AllKeysExhausted)
    }

    /// 取出操作原始错误
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(err) => Some(err),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for ExecuteError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation(err) => write!(f, "{err}"),
            Self::Timeout { timeout_ms } => write!(f, "Request timed out after {timeout_ms}ms"),
            Self::BulkheadRejected { max_concurrency } => write!(
                f,
                "Bulkhead capacity exceeded: more than {max_concurrency} concurrent requests"
            ),
            Self::AllKeysExhausted => {
                f.write_str("All API keys exhausted: no healthy keys available")
            }
            Self::Fallback(err) => write!(f, "Fallback failed: {err}"),
            Self::UnknownProvider { provider: Some(provider) } => {
                write!(f, "Unknown provider: {provider}")
            }
            Self::UnknownProvider { provider: None } => {
                f.write_str("Provider must be specified in options")
            }
        }
    }
}

impl<E> std::error::Error for ExecuteError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Operation(err) => Some(err),
            Self::Fallback(err) => Some(&**err),
            _ => None,
        }
    }
}
