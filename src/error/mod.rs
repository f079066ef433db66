//! The unified error handling system for the key manager.

// 1. Core Types
pub use execute::{ExecuteError, ExecuteErrorKind};
pub use types::ManagerError;

/// A unified `Result` type for the entire crate.
///
/// All fallible configuration, persistence and registry functions return this
/// type. Request execution returns [`ExecuteError`] instead so callers can
/// branch on the failure kind.
pub type Result<T> = std::result::Result<T, ManagerError>;

// 3. Module declarations
pub mod execute;
pub mod macros;
pub mod types;

// 4. Context Trait for adding context to errors.
/// 为错误附加上下文信息
pub trait Context<T, E> {
    /// 附加固定的上下文描述
    #[track_caller]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display;

    /// 出错时才计算上下文描述
    #[track_caller]
    fn with_context<C, F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display;
}

impl<T, E> Context<T, E> for std::result::Result<T, E>
where
    E: Into<ManagerError>,
{
    #[track_caller]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display,
    {
        self.with_context(|| context)
    }

    #[track_caller]
    fn with_context<C, F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display,
    {
        match self {
            Ok(value) => Ok(value),
            Err(error) => {
                let context_message = context().to_string();
                Err(ManagerError::Context {
                    context: context_message,
                    source: Box::new(error.into()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests;
