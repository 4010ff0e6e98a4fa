//! Convenience constructors for errors raised inside this crate
//!
//! Code that owns its throw site builds a typed `AppError` here instead of
//! relying on the substring rules.

use std::time::Duration;

use super::codes::ErrorCode;
use super::types::AppError;

impl AppError {
    /// An operation was attempted while the connectivity source reports offline
    pub fn offline(operation: &str) -> Self {
        AppError::new(
            ErrorCode::NetworkOffline,
            format!("'{}' attempted while offline", operation),
        )
        .with_context("operation", operation)
    }

    /// An operation did not finish within `duration`
    pub fn timeout(operation: &str, duration: Duration) -> Self {
        AppError::new(
            ErrorCode::NetworkTimeout,
            format!("'{}' timed out after {:?}", operation, duration),
        )
        .with_context("operation", operation)
        .with_context("timeout_ms", duration.as_millis() as u64)
    }

    /// A request could not reach its destination
    pub fn network(message: impl Into<String>) -> Self {
        AppError::new(ErrorCode::NetworkRequestFailed, message)
    }

    /// Caller-supplied input was rejected
    pub fn validation(field: &str, message: &str) -> Self {
        AppError::new(
            ErrorCode::ValidationFailed,
            format!("validation failed for {}: {}", field, message),
        )
        .with_context("field", field)
    }

    /// An in-flight operation was abandoned by its caller
    pub fn cancelled(operation: &str) -> Self {
        AppError::new(
            ErrorCode::OperationCancelled,
            format!("'{}' was cancelled", operation),
        )
        .with_context("operation", operation)
    }

    /// The rendering surface reported that its context is gone
    pub fn context_lost(surface: &str, reason: Option<&str>) -> Self {
        let message = match reason {
            Some(reason) => format!("rendering context lost on '{}': {}", surface, reason),
            None => format!("rendering context lost on '{}'", surface),
        };
        AppError::new(ErrorCode::RenderContextLost, message).with_context("surface", surface)
    }

    /// Data read back from storage could not be decoded
    pub fn corrupted(what: &str, details: impl std::fmt::Display) -> Self {
        AppError::new(
            ErrorCode::DataCorrupted,
            format!("{} could not be decoded: {}", what, details),
        )
    }
}
