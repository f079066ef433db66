//! # 错误分类器
//!
//! 将调用方操作返回的任意错误（以及服务商给出的结束原因）归一化为分类结果，
//! 分类结果决定是否重试、冷却多久、是否计入密钥失败以及是否永久废弃密钥。

use super::types::CircuitBreakerConfig;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

/// 认证失败时的冷却时长，实际上永不恢复
pub const AUTH_COOLDOWN_MS: u64 = 999_999_999;

static QUOTA_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)429|quota|exhausted|resource.?exhausted|too.?many.?requests|rate.?limit")
        .expect("valid quota regex")
});

static AUTH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)403|permission.?denied|invalid.?api.?key|unauthorized|unauthenticated")
        .expect("valid auth regex")
});

static TRANSIENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)500|502|503|504|internal|unavailable|deadline|timeout|overloaded")
        .expect("valid transient regex")
});

static BAD_REQUEST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)400|invalid.?argument|failed.?precondition|malformed|not.?found|404")
        .expect("valid bad request regex")
});

/// 错误种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// 配额/限流
    Quota,
    /// 瞬时服务端错误
    Transient,
    /// 认证/授权失败
    Auth,
    /// 请求本身有误
    BadRequest,
    /// 内容安全拦截
    Safety,
    /// 复述拦截
    Recitation,
    /// 超时
    Timeout,
    /// 未知错误
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Quota => "QUOTA",
            Self::Transient => "TRANSIENT",
            Self::Auth => "AUTH",
            Self::BadRequest => "BAD_REQUEST",
            Self::Safety => "SAFETY",
            Self::Recitation => "RECITATION",
            Self::Timeout => "TIMEOUT",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// 一次失败的分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    /// 错误种类
    pub kind: ErrorKind,
    /// 是否可重试
    pub retryable: bool,
    /// 冷却时长（毫秒），0 表示不冷却
    pub cooldown_ms: u64,
    /// 是否计入密钥失败
    pub mark_key_failed: bool,
    /// 是否永久废弃密钥
    pub mark_key_dead: bool,
}

impl ErrorClassification {
    /// 不属于密钥问题的分类：不重试、不冷却、不计数
    #[must_use]
    pub const fn not_key_problem(kind: ErrorKind) -> Self {
        Self {
            kind,
            retryable: false,
            cooldown_ms: 0,
            mark_key_failed: false,
            mark_key_dead: false,
        }
    }

    /// 可重试并计入失败的分类
    #[must_use]
    pub const fn retryable(kind: ErrorKind, cooldown_ms: u64) -> Self {
        Self {
            kind,
            retryable: true,
            cooldown_ms,
            mark_key_failed: true,
            mark_key_dead: false,
        }
    }

    /// 认证失败：永久废弃
    #[must_use]
    pub const fn auth() -> Self {
        Self {
            kind: ErrorKind::Auth,
            retryable: false,
            cooldown_ms: AUTH_COOLDOWN_MS,
            mark_key_failed: true,
            mark_key_dead: true,
        }
    }

    /// 冷却时长
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// 服务商给出的生成结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    /// 正常结束
    Stop,
    /// 达到长度上限
    MaxTokens,
    /// 内容安全拦截
    Safety,
    /// 复述拦截
    Recitation,
    /// 其他原因
    Other,
}

impl FinishReason {
    /// 从服务商字符串解析，未知值归为 `Other`
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "STOP" => Self::Stop,
            "MAX_TOKENS" => Self::MaxTokens,
            "SAFETY" => Self::Safety,
            "RECITATION" => Self::Recitation,
            _ => Self::Other,
        }
    }
}

/// 可被分类器识别的上游错误
///
/// 调用方的错误类型实现该 trait，暴露状态码、重试提示等信息；
/// 默认实现只依赖 `Display` 文本做模式匹配。
pub trait UpstreamError: fmt::Display {
    /// HTTP 风格状态码
    fn status_code(&self) -> Option<u16> {
        None
    }

    /// 原始的 `Retry-After` 提示（秒数或 HTTP 日期）
    fn retry_after(&self) -> Option<String> {
        None
    }

    /// 是否为超时
    fn is_timeout(&self) -> bool {
        false
    }
}

impl UpstreamError for anyhow::Error {
    fn status_code(&self) -> Option<u16> {
        self.downcast_ref::<ApiError>().and_then(|e| e.status)
    }

    fn retry_after(&self) -> Option<String> {
        self.downcast_ref::<ApiError>()
            .and_then(|e| e.retry_after.clone())
    }

    fn is_timeout(&self) -> bool {
        self.downcast_ref::<TimeoutError>().is_some()
    }
}

impl UpstreamError for String {}

impl UpstreamError for &str {}

impl UpstreamError for std::io::Error {
    fn is_timeout(&self) -> bool {
        self.kind() == std::io::ErrorKind::TimedOut
    }
}

/// 通用的上游 API 错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    /// 状态码
    pub status: Option<u16>,
    /// 错误信息
    pub message: String,
    /// `Retry-After` 提示
    pub retry_after: Option<String>,
}

impl ApiError {
    /// 创建带状态码的错误
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            retry_after: None,
        }
    }

    /// 创建只有错误信息的错误
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// 附加 `Retry-After` 提示
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: impl Into<String>) -> Self {
        self.retry_after = Some(retry_after.into());
        self
    }
}

impl UpstreamError for ApiError {
    fn status_code(&self) -> Option<u16> {
        self.status
    }

    fn retry_after(&self) -> Option<String> {
        self.retry_after.clone()
    }
}

/// 编排器在单次尝试超时后合成的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Request timed out after {timeout_ms}ms")]
pub struct TimeoutError {
    /// 超时时长（毫秒）
    pub timeout_ms: u64,
}

impl UpstreamError for TimeoutError {
    fn is_timeout(&self) -> bool {
        true
    }
}

/// 错误分类器
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier {
    config: CircuitBreakerConfig,
}

impl ErrorClassifier {
    /// 使用给定熔断参数创建分类器
    #[must_use]
    pub const fn new(config: CircuitBreakerConfig) -> Self {
        Self { config }
    }

    /// 对一次失败进行分类
    ///
    /// 优先级：结束原因 > 超时 > 认证 > 配额 > 请求错误 > 瞬时错误 > 未知。
    pub fn classify(
        &self,
        error: &(impl UpstreamError + ?Sized),
        finish_reason: Option<FinishReason>,
    ) -> ErrorClassification {
        match finish_reason {
            Some(FinishReason::Safety) => {
                return ErrorClassification::not_key_problem(ErrorKind::Safety);
            }
            Some(FinishReason::Recitation) => {
                return ErrorClassification::not_key_problem(ErrorKind::Recitation);
            }
            _ => {}
        }

        let message = error.to_string();
        let status = error.status_code();
        let transient_cooldown = self.config.transient_cooldown_ms;

        if error.is_timeout() || message.to_lowercase().contains("timeout") {
            return ErrorClassification::retryable(ErrorKind::Timeout, transient_cooldown);
        }

        if status == Some(403) || AUTH_PATTERN.is_match(&message) {
            return ErrorClassification::auth();
        }

        if status == Some(429) || QUOTA_PATTERN.is_match(&message) {
            let cooldown = error
                .retry_after()
                .and_then(|hint| parse_retry_after(&hint, Utc::now()))
                .map_or(self.config.quota_cooldown_ms, |hint| {
                    duration_to_millis(hint).min(AUTH_COOLDOWN_MS)
                });
            return ErrorClassification::retryable(ErrorKind::Quota, cooldown);
        }

        if status == Some(400) || BAD_REQUEST_PATTERN.is_match(&message) {
            return ErrorClassification::not_key_problem(ErrorKind::BadRequest);
        }

        if status.is_some_and(|s| (500..600).contains(&s)) || TRANSIENT_PATTERN.is_match(&message)
        {
            return ErrorClassification::retryable(ErrorKind::Transient, transient_cooldown);
        }

        ErrorClassification::retryable(ErrorKind::Unknown, transient_cooldown)
    }
}

/// 使用默认参数分类
pub fn classify_error(
    error: &(impl UpstreamError + ?Sized),
    finish_reason: Option<FinishReason>,
) -> ErrorClassification {
    ErrorClassifier::default().classify(error, finish_reason)
}

/// 解析 `Retry-After` 提示
///
/// 接受整数秒或 HTTP 日期，返回相对 `now` 的时长；无法解析时返回 `None`。
/// 已经过去的日期返回零时长。
#[must_use]
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
