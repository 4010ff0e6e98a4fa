//! Error codes and their canonical metadata
//!
//! Each [`ErrorCode`] owns one row in a static table that supplies the default
//! user message, severity, category, recovery strategy and retryability. A code
//! on its own is therefore always enough to build a complete
//! [`AppError`](super::AppError).

use serde::{Deserialize, Serialize};
use std::fmt;

/// How bad a failure is for the person using the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Expected, handled inline near the point of input
    Low,
    /// Surfaced as a transient notification
    Medium,
    /// Surfaced as a notification, usually with a retry affordance
    High,
    /// Caught by a containment boundary, full fallback view
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Broad area a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Network,
    Data,
    Validation,
    Rendering,
    Auth,
    Database,
    AiService,
    Unknown,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Network,
        Category::Data,
        Category::Validation,
        Category::Rendering,
        Category::Auth,
        Category::Database,
        Category::AiService,
        Category::Unknown,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Category::Network => "network",
            Category::Data => "data",
            Category::Validation => "validation",
            Category::Rendering => "rendering",
            Category::Auth => "auth",
            Category::Database => "database",
            Category::AiService => "ai-service",
            Category::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Advisory hint describing how a failure is best recovered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryStrategy {
    Retry,
    RetryWithBackoff,
    Reload,
    UseCached,
    OfflineMode,
    ManualRetry,
    ContactSupport,
    None,
}

impl RecoveryStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::RetryWithBackoff => "retry-with-backoff",
            RecoveryStrategy::Reload => "reload",
            RecoveryStrategy::UseCached => "use-cached",
            RecoveryStrategy::OfflineMode => "offline-mode",
            RecoveryStrategy::ManualRetry => "manual-retry",
            RecoveryStrategy::ContactSupport => "contact-support",
            RecoveryStrategy::None => "none",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stable identifier of a failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Network
    NetworkOffline,
    NetworkTimeout,
    NetworkRequestFailed,
    NetworkServerError,
    NetworkRateLimited,

    // Data
    DataNotFound,
    DataParseFailed,
    DataCorrupted,
    ContentLoadFailed,

    // Validation
    ValidationFailed,
    InvalidInput,

    // Rendering
    RenderFailed,
    RenderUnsupported,
    RenderContextLost,
    RenderShaderCompile,
    RenderOutOfMemory,
    AssetLoadFailed,

    // Auth
    AuthRequired,
    AuthExpired,
    PermissionDenied,

    // Database / local storage
    DatabaseUnavailable,
    DatabaseQueryFailed,
    StorageQuotaExceeded,

    // AI service
    AiServiceUnavailable,
    AiRateLimited,
    AiResponseInvalid,
    AiModelLoadFailed,

    // Unknown
    OperationCancelled,
    Unknown,
}

/// Canonical defaults for one [`ErrorCode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeMetadata {
    pub user_message: &'static str,
    pub severity: Severity,
    pub category: Category,
    pub recovery_strategy: RecoveryStrategy,
    pub retryable: bool,
}

const fn meta(
    user_message: &'static str,
    severity: Severity,
    category: Category,
    recovery_strategy: RecoveryStrategy,
    retryable: bool,
) -> CodeMetadata {
    CodeMetadata {
        user_message,
        severity,
        category,
        recovery_strategy,
        retryable,
    }
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 29] = [
        ErrorCode::NetworkOffline,
        ErrorCode::NetworkTimeout,
        ErrorCode::NetworkRequestFailed,
        ErrorCode::NetworkServerError,
        ErrorCode::NetworkRateLimited,
        ErrorCode::DataNotFound,
        ErrorCode::DataParseFailed,
        ErrorCode::DataCorrupted,
        ErrorCode::ContentLoadFailed,
        ErrorCode::ValidationFailed,
        ErrorCode::InvalidInput,
        ErrorCode::RenderFailed,
        ErrorCode::RenderUnsupported,
        ErrorCode::RenderContextLost,
        ErrorCode::RenderShaderCompile,
        ErrorCode::RenderOutOfMemory,
        ErrorCode::AssetLoadFailed,
        ErrorCode::AuthRequired,
        ErrorCode::AuthExpired,
        ErrorCode::PermissionDenied,
        ErrorCode::DatabaseUnavailable,
        ErrorCode::DatabaseQueryFailed,
        ErrorCode::StorageQuotaExceeded,
        ErrorCode::AiServiceUnavailable,
        ErrorCode::AiRateLimited,
        ErrorCode::AiResponseInvalid,
        ErrorCode::AiModelLoadFailed,
        ErrorCode::OperationCancelled,
        ErrorCode::Unknown,
    ];

    /// The canonical defaults for this code
    pub const fn metadata(&self) -> CodeMetadata {
        use Category as C;
        use RecoveryStrategy as R;
        use Severity as S;

        match self {
            ErrorCode::NetworkOffline => meta(
                "You appear to be offline. Some features may be unavailable.",
                S::Medium,
                C::Network,
                R::OfflineMode,
                true,
            ),
            ErrorCode::NetworkTimeout => meta(
                "The request took too long. Please try again.",
                S::Medium,
                C::Network,
                R::RetryWithBackoff,
                true,
            ),
            ErrorCode::NetworkRequestFailed => meta(
                "Unable to reach the server. Please check your connection.",
                S::Medium,
                C::Network,
                R::RetryWithBackoff,
                true,
            ),
            ErrorCode::NetworkServerError => meta(
                "The server ran into a problem. Please try again later.",
                S::High,
                C::Network,
                R::RetryWithBackoff,
                true,
            ),
            ErrorCode::NetworkRateLimited => meta(
                "Too many requests. Please wait a moment.",
                S::Medium,
                C::Network,
                R::RetryWithBackoff,
                true,
            ),
            ErrorCode::DataNotFound => meta(
                "The requested content could not be found.",
                S::Medium,
                C::Data,
                R::None,
                false,
            ),
            ErrorCode::DataParseFailed => meta(
                "Some content could not be read correctly.",
                S::Medium,
                C::Data,
                R::UseCached,
                false,
            ),
            ErrorCode::DataCorrupted => meta(
                "Saved data appears to be damaged. Reloading may help.",
                S::High,
                C::Data,
                R::Reload,
                false,
            ),
            ErrorCode::ContentLoadFailed => meta(
                "Content failed to load.",
                S::Medium,
                C::Data,
                R::Retry,
                true,
            ),
            ErrorCode::ValidationFailed => meta(
                "Please check your input and try again.",
                S::Low,
                C::Validation,
                R::None,
                false,
            ),
            ErrorCode::InvalidInput => meta(
                "That value is not valid.",
                S::Low,
                C::Validation,
                R::None,
                false,
            ),
            ErrorCode::RenderFailed => meta(
                "Part of the application failed to display.",
                S::Critical,
                C::Rendering,
                R::Reload,
                false,
            ),
            ErrorCode::RenderUnsupported => meta(
                "Your device does not support 3D graphics. A simplified view is available.",
                S::High,
                C::Rendering,
                R::None,
                false,
            ),
            ErrorCode::RenderContextLost => meta(
                "The 3D view was interrupted. Reloading the view should fix this.",
                S::High,
                C::Rendering,
                R::Reload,
                true,
            ),
            ErrorCode::RenderShaderCompile => meta(
                "The 3D view could not be prepared on this device.",
                S::High,
                C::Rendering,
                R::ManualRetry,
                false,
            ),
            ErrorCode::RenderOutOfMemory => meta(
                "The 3D view ran out of memory.",
                S::Critical,
                C::Rendering,
                R::Reload,
                false,
            ),
            ErrorCode::AssetLoadFailed => meta(
                "Some visual assets failed to load.",
                S::Medium,
                C::Rendering,
                R::Retry,
                true,
            ),
            ErrorCode::AuthRequired => meta(
                "Please sign in to continue.",
                S::Medium,
                C::Auth,
                R::ManualRetry,
                false,
            ),
            ErrorCode::AuthExpired => meta(
                "Your session has expired. Please sign in again.",
                S::Medium,
                C::Auth,
                R::ManualRetry,
                false,
            ),
            ErrorCode::PermissionDenied => meta(
                "You do not have permission to do that.",
                S::High,
                C::Auth,
                R::ContactSupport,
                false,
            ),
            ErrorCode::DatabaseUnavailable => meta(
                "Local storage is unavailable right now.",
                S::High,
                C::Database,
                R::Retry,
                true,
            ),
            ErrorCode::DatabaseQueryFailed => meta(
                "A data lookup failed.",
                S::Medium,
                C::Database,
                R::Retry,
                true,
            ),
            ErrorCode::StorageQuotaExceeded => meta(
                "Device storage is full.",
                S::High,
                C::Database,
                R::ContactSupport,
                false,
            ),
            ErrorCode::AiServiceUnavailable => meta(
                "The assistant is unavailable right now.",
                S::Medium,
                C::AiService,
                R::RetryWithBackoff,
                true,
            ),
            ErrorCode::AiRateLimited => meta(
                "The assistant is busy. Please wait a moment.",
                S::Medium,
                C::AiService,
                R::RetryWithBackoff,
                true,
            ),
            ErrorCode::AiResponseInvalid => meta(
                "The assistant returned an unexpected response.",
                S::Medium,
                C::AiService,
                R::ManualRetry,
                false,
            ),
            ErrorCode::AiModelLoadFailed => meta(
                "The on-device assistant could not be loaded.",
                S::High,
                C::AiService,
                R::ContactSupport,
                false,
            ),
            ErrorCode::OperationCancelled => meta(
                "The operation was cancelled.",
                S::Low,
                C::Unknown,
                R::None,
                false,
            ),
            ErrorCode::Unknown => meta(
                "Something went wrong. Please try again.",
                S::High,
                C::Unknown,
                R::ManualRetry,
                false,
            ),
        }
    }

    /// Wire identifier, e.g. `NETWORK_REQUEST_FAILED`
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NetworkOffline => "NETWORK_OFFLINE",
            ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCode::NetworkRequestFailed => "NETWORK_REQUEST_FAILED",
            ErrorCode::NetworkServerError => "NETWORK_SERVER_ERROR",
            ErrorCode::NetworkRateLimited => "NETWORK_RATE_LIMITED",
            ErrorCode::DataNotFound => "DATA_NOT_FOUND",
            ErrorCode::DataParseFailed => "DATA_PARSE_FAILED",
            ErrorCode::DataCorrupted => "DATA_CORRUPTED",
            ErrorCode::ContentLoadFailed => "CONTENT_LOAD_FAILED",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::RenderFailed => "RENDER_FAILED",
            ErrorCode::RenderUnsupported => "RENDER_UNSUPPORTED",
            ErrorCode::RenderContextLost => "RENDER_CONTEXT_LOST",
            ErrorCode::RenderShaderCompile => "RENDER_SHADER_COMPILE",
            ErrorCode::RenderOutOfMemory => "RENDER_OUT_OF_MEMORY",
            ErrorCode::AssetLoadFailed => "ASSET_LOAD_FAILED",
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::AuthExpired => "AUTH_EXPIRED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::DatabaseUnavailable => "DATABASE_UNAVAILABLE",
            ErrorCode::DatabaseQueryFailed => "DATABASE_QUERY_FAILED",
            ErrorCode::StorageQuotaExceeded => "STORAGE_QUOTA_EXCEEDED",
            ErrorCode::AiServiceUnavailable => "AI_SERVICE_UNAVAILABLE",
            ErrorCode::AiRateLimited => "AI_RATE_LIMITED",
            ErrorCode::AiResponseInvalid => "AI_RESPONSE_INVALID",
            ErrorCode::AiModelLoadFailed => "AI_MODEL_LOAD_FAILED",
            ErrorCode::OperationCancelled => "OPERATION_CANCELLED",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
