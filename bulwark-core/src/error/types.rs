//! The canonical `AppError` value
//!
//! An `AppError` is created once at the point where a failure is caught and is
//! never mutated afterwards. Construction goes through [`AppError::new`] or
//! [`AppError::with_options`]; the `with_*` adapters consume the value and are
//! only meant for use at the creation site.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

use super::codes::{Category, ErrorCode, RecoveryStrategy, Severity};

/// String-keyed diagnostic context attached to errors and log entries
pub type ContextMap = BTreeMap<String, serde_json::Value>;

/// Shared handle to the original failure
pub type ErrorCause = Arc<dyn StdError + Send + Sync + 'static>;

/// Canonical classification of any failure
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("[{code}] {message}")]
#[serde(rename_all = "camelCase")]
pub struct AppError {
    code: ErrorCode,
    message: String,
    user_message: String,
    severity: Severity,
    category: Category,
    recovery_strategy: RecoveryStrategy,
    retryable: bool,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<ContextMap>,
    #[source]
    #[serde(skip)]
    cause: Option<ErrorCause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stack: Option<String>,
}

/// Per-instance overrides of the canonical code metadata
#[derive(Debug, Clone, Default)]
pub struct AppErrorOptions {
    pub user_message: Option<String>,
    pub severity: Option<Severity>,
    pub category: Option<Category>,
    pub recovery_strategy: Option<RecoveryStrategy>,
    pub retryable: Option<bool>,
    pub context: Option<ContextMap>,
    pub cause: Option<ErrorCause>,
    pub stack: Option<String>,
}

impl AppErrorOptions {
    /// Merge `other` on top of `self`; fields set in `other` win and
    /// context maps are combined.
    pub fn merged(mut self, other: AppErrorOptions) -> Self {
        self.user_message = other.user_message.or(self.user_message);
        self.severity = other.severity.or(self.severity);
        self.category = other.category.or(self.category);
        self.recovery_strategy = other.recovery_strategy.or(self.recovery_strategy);
        self.retryable = other.retryable.or(self.retryable);
        self.cause = other.cause.or(self.cause);
        self.stack = other.stack.or(self.stack);
        self.context = match (self.context, other.context) {
            (Some(mut base), Some(extra)) => {
                base.extend(extra);
                Some(base)
            }
            (base, extra) => extra.or(base),
        };
        self
    }
}

impl AppError {
    /// Build an error from a code and a diagnostic message, using the
    /// canonical defaults for every derived field.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::with_options(code, message, AppErrorOptions::default())
    }

    /// Build an error whose diagnostic message is the code's user message
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.metadata().user_message)
    }

    /// Build an error from a code with explicit overrides
    pub fn with_options(
        code: ErrorCode,
        message: impl Into<String>,
        options: AppErrorOptions,
    ) -> Self {
        let defaults = code.metadata();
        Self {
            code,
            message: message.into(),
            user_message: options
                .user_message
                .unwrap_or_else(|| defaults.user_message.to_string()),
            severity: options.severity.unwrap_or(defaults.severity),
            category: options.category.unwrap_or(defaults.category),
            recovery_strategy: options
                .recovery_strategy
                .unwrap_or(defaults.recovery_strategy),
            retryable: options.retryable.unwrap_or(defaults.retryable),
            timestamp: Utc::now(),
            context: options.context.filter(|ctx| !ctx.is_empty()),
            cause: options.cause,
            stack: options.stack,
        }
    }

    /// Attach one context value at the creation site
    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.context
            .get_or_insert_with(ContextMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Attach the original failure at the creation site
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Diagnostic message; never shown to end users
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The only text that may be shown to an end user
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        self.recovery_strategy
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn context(&self) -> Option<&ContextMap> {
        self.context.as_ref()
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

impl PartialEq for AppError {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
            && self.message == other.message
            && self.user_message == other.user_message
            && self.severity == other.severity
            && self.category == other.category
            && self.recovery_strategy == other.recovery_strategy
            && self.retryable == other.retryable
            && self.timestamp == other.timestamp
            && self.context == other.context
            && self.stack == other.stack
            && self.cause.as_ref().map(|c| c.to_string())
                == other.cause.as_ref().map(|c| c.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
pub type BulwarkResult<T> = std::result::Result<T, AppError>;
