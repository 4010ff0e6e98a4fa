//! Error taxonomy and classification
//!
//! Every failure that crosses a boundary of this crate is turned into an
//! [`AppError`]: a stable [`ErrorCode`] plus the derived user message,
//! severity, category, recovery strategy and retryability.
//!
//! ```text
//! raw failure ──► Classifier ──► AppError ──┬─► ErrorLogger
//!                                           ├─► Boundary fallback
//!                                           └─► recovery decision
//! ```
//!
//! ## Taxonomy
//!
//! | Category    | Codes                                                        |
//! |-------------|--------------------------------------------------------------|
//! | network     | offline, timeout, request failed, server error, rate limited |
//! | data        | not found, parse failed, corrupted, content load failed      |
//! | validation  | validation failed, invalid input                             |
//! | rendering   | failed, unsupported, context lost, shader, out of memory     |
//! | auth        | required, expired, permission denied                         |
//! | database    | unavailable, query failed, quota exceeded                    |
//! | ai-service  | unavailable, rate limited, invalid response, model load      |
//! | unknown     | cancelled, unknown                                           |

pub mod classifier;
pub mod codes;
pub mod constructors;
pub mod raw;
pub mod types;

#[cfg(test)]
mod tests;

pub use classifier::{ClassificationRule, Classifier, ClassifyOptions, RuleTable};
pub use codes::{Category, CodeMetadata, ErrorCode, RecoveryStrategy, Severity};
pub use raw::{panic_message, RawFailure};
pub use types::{AppError, AppErrorOptions, BulwarkResult, ContextMap, ErrorCause, Result};
