//! Failure classification
//!
//! [`Classifier::classify`] turns any [`RawFailure`] into an [`AppError`]:
//!
//! 1. An already classified error passes through unchanged.
//! 2. Typed failures map directly: io error kinds, elapsed timers, cancelled tasks.
//! 3. Remaining failures are matched against an ordered [`RuleTable`] of
//!    case-insensitive substrings; the first matching rule wins.
//! 4. Anything left over becomes [`ErrorCode::Unknown`].
//!
//! The rule tables are plain data and can be replaced or extended per call.
//! Substring rules are only meant for foreign failures; code that owns its
//! throw site should build an `AppError` directly.

use std::io::ErrorKind;

use super::codes::ErrorCode;
use super::raw::RawFailure;
use super::types::{AppError, AppErrorOptions, ContextMap};

/// One heuristic: if any needle occurs in the failure message, use `code`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRule {
    code: ErrorCode,
    needles: Vec<String>,
}

impl ClassificationRule {
    pub fn new<I, S>(code: ErrorCode, needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            code,
            needles: needles
                .into_iter()
                .map(|needle| needle.into().to_lowercase())
                .collect(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    fn matches(&self, lowered: &str) -> bool {
        self.needles
            .iter()
            .any(|needle| !needle.is_empty() && lowered.contains(needle.as_str()))
    }
}

/// Ordered list of classification rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTable {
    rules: Vec<ClassificationRule>,
}

impl RuleTable {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// The general-purpose table used for arbitrary failures
    pub fn builtin() -> Self {
        use ErrorCode as E;

        Self::empty()
            .with_rule(ClassificationRule::new(
                E::OperationCancelled,
                ["aborterror", "aborted", "cancelled", "canceled"],
            ))
            .with_rule(ClassificationRule::new(
                E::NetworkOffline,
                ["offline", "internet disconnected", "no internet"],
            ))
            .with_rule(ClassificationRule::new(
                E::NetworkTimeout,
                ["timeout", "timed out", "deadline exceeded", "deadline has elapsed"],
            ))
            .with_rule(ClassificationRule::new(
                E::NetworkRateLimited,
                ["429", "too many requests", "rate limit"],
            ))
            .with_rule(ClassificationRule::new(
                E::AuthExpired,
                ["token expired", "session expired", "jwt expired"],
            ))
            .with_rule(ClassificationRule::new(
                E::AuthRequired,
                ["401", "unauthorized", "unauthenticated"],
            ))
            .with_rule(ClassificationRule::new(
                E::PermissionDenied,
                ["403", "forbidden", "permission denied"],
            ))
            .with_rule(ClassificationRule::new(
                E::NetworkServerError,
                [
                    "500",
                    "502",
                    "503",
                    "504",
                    "internal server error",
                    "bad gateway",
                    "service unavailable",
                ],
            ))
            .with_rule(ClassificationRule::new(
                E::NetworkRequestFailed,
                [
                    "network",
                    "fetch",
                    "connection",
                    "econnrefused",
                    "econnreset",
                    "socket",
                    "dns",
                ],
            ))
            .with_rule(ClassificationRule::new(
                E::RenderContextLost,
                ["context lost", "contextlost", "context_lost"],
            ))
            .with_rule(ClassificationRule::new(
                E::RenderShaderCompile,
                ["shader"],
            ))
            .with_rule(ClassificationRule::new(
                E::RenderUnsupported,
                ["webgl", "webgpu", "gpu", "graphics"],
            ))
            .with_rule(ClassificationRule::new(
                E::StorageQuotaExceeded,
                ["quotaexceeded", "quota exceeded", "no space left"],
            ))
            .with_rule(ClassificationRule::new(
                E::DatabaseUnavailable,
                ["indexeddb", "database is locked", "database", "sqlite"],
            ))
            .with_rule(ClassificationRule::new(
                E::DataParseFailed,
                ["json", "parse", "unexpected token", "syntax error"],
            ))
            .with_rule(ClassificationRule::new(
                E::DataNotFound,
                ["404", "not found"],
            ))
            .with_rule(ClassificationRule::new(
                E::AiServiceUnavailable,
                ["llm", "inference", "ai service", "assistant"],
            ))
            .with_rule(ClassificationRule::new(
                E::ValidationFailed,
                ["validation", "invalid"],
            ))
    }

    /// Sub-classification for failures raised by a rendering surface
    pub fn rendering() -> Self {
        use ErrorCode as E;

        Self::empty()
            .with_rule(ClassificationRule::new(
                E::RenderContextLost,
                [
                    "context lost",
                    "contextlost",
                    "context_lost",
                    "lost context",
                    "device lost",
                ],
            ))
            .with_rule(ClassificationRule::new(
                E::RenderOutOfMemory,
                ["out of memory", "oom", "allocation failed"],
            ))
            .with_rule(ClassificationRule::new(
                E::RenderShaderCompile,
                ["shader", "glsl", "wgsl", "compile"],
            ))
            .with_rule(ClassificationRule::new(
                E::RenderUnsupported,
                [
                    "not supported",
                    "unsupported",
                    "webgl",
                    "webgpu",
                    "no gpu",
                    "unavailable",
                ],
            ))
    }

    /// Append a rule with the lowest precedence
    pub fn with_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Insert a rule with the highest precedence
    pub fn prepend(mut self, rule: ClassificationRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// First matching code for a message, if any rule matches
    pub fn matching(&self, message: &str) -> Option<ErrorCode> {
        let lowered = message.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| rule.code)
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Per-call classification options
#[derive(Debug, Clone, Default)]
pub struct ClassifyOptions<'a> {
    /// Replacement rule table for this call
    pub rules: Option<&'a RuleTable>,
    /// Context recorded on the produced error
    pub context: Option<ContextMap>,
    /// Overrides of the code's canonical metadata
    pub overrides: AppErrorOptions,
}

impl<'a> ClassifyOptions<'a> {
    pub fn with_context(context: ContextMap) -> Self {
        Self {
            context: Some(context),
            ..Default::default()
        }
    }
}

/// Maps raw failures to canonical `AppError` values
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: RuleTable,
    rendering: RuleTable,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    pub fn new() -> Self {
        Self {
            rules: RuleTable::builtin(),
            rendering: RuleTable::rendering(),
        }
    }

    /// Use a different general rule table for every call
    pub fn with_rules(mut self, rules: RuleTable) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Classify a failure. Never panics and never returns a partial value.
    pub fn classify(&self, raw: impl Into<RawFailure>) -> AppError {
        self.classify_with(raw, ClassifyOptions::default())
    }

    /// Classify a failure and record `context` on the result
    pub fn classify_in(&self, raw: impl Into<RawFailure>, context: ContextMap) -> AppError {
        self.classify_with(raw, ClassifyOptions::with_context(context))
    }

    pub fn classify_with(
        &self,
        raw: impl Into<RawFailure>,
        options: ClassifyOptions<'_>,
    ) -> AppError {
        let raw = raw.into();
        if let RawFailure::Classified(err) = raw {
            return err;
        }

        let rules = options.rules.unwrap_or(&self.rules);
        let code = typed_code(&raw)
            .or_else(|| rules.matching(&raw.message()))
            .unwrap_or(ErrorCode::Unknown);

        self.build(code, raw, options)
    }

    /// Classify a failure raised by a rendering surface.
    ///
    /// Rendering-category errors pass through; everything else is matched
    /// against the rendering table and falls back to [`ErrorCode::RenderFailed`].
    pub fn classify_rendering(&self, raw: impl Into<RawFailure>) -> AppError {
        let raw = raw.into();
        match raw {
            RawFailure::Classified(err)
                if err.category() == super::codes::Category::Rendering =>
            {
                err
            }
            RawFailure::Classified(err) => {
                let code = self
                    .rendering
                    .matching(err.message())
                    .unwrap_or(ErrorCode::RenderFailed);
                let message = err.message().to_string();
                AppError::with_options(
                    code,
                    message,
                    AppErrorOptions {
                        context: err.context().cloned(),
                        cause: Some(std::sync::Arc::new(err)),
                        ..Default::default()
                    },
                )
            }
            other => {
                let code = self
                    .rendering
                    .matching(&other.message())
                    .unwrap_or(ErrorCode::RenderFailed);
                self.build(code, other, ClassifyOptions::default())
            }
        }
    }

    fn build(&self, code: ErrorCode, raw: RawFailure, options: ClassifyOptions<'_>) -> AppError {
        let message = raw.message();
        let stack = match &raw {
            RawFailure::Panic(_) => Some(message.clone()),
            _ => None,
        };
        let base = AppErrorOptions {
            context: options.context,
            cause: raw.into_cause(),
            stack,
            ..Default::default()
        };
        AppError::with_options(code, message, base.merged(options.overrides))
    }
}

/// Direct mapping for failures whose type already says what happened
fn typed_code(raw: &RawFailure) -> Option<ErrorCode> {
    match raw {
        RawFailure::Io(err) => io_code(err.kind()),
        RawFailure::Elapsed => Some(ErrorCode::NetworkTimeout),
        RawFailure::Cancelled => Some(ErrorCode::OperationCancelled),
        RawFailure::Native(err) => {
            let mut current: Option<&(dyn std::error::Error + 'static)> = Some(&**err);
            while let Some(inner) = current {
                if let Some(io) = inner.downcast_ref::<std::io::Error>() {
                    if let Some(code) = io_code(io.kind()) {
                        return Some(code);
                    }
                }
                if inner.is::<tokio::time::error::Elapsed>() {
                    return Some(ErrorCode::NetworkTimeout);
                }
                if inner.is::<serde_json::Error>() {
                    return Some(ErrorCode::DataParseFailed);
                }
                current = inner.source();
            }
            None
        }
        _ => None,
    }
}

fn io_code(kind: ErrorKind) -> Option<ErrorCode> {
    match kind {
        ErrorKind::TimedOut => Some(ErrorCode::NetworkTimeout),
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe
        | ErrorKind::AddrNotAvailable => Some(ErrorCode::NetworkRequestFailed),
        ErrorKind::PermissionDenied => Some(ErrorCode::PermissionDenied),
        ErrorKind::NotFound => Some(ErrorCode::DataNotFound),
        ErrorKind::InvalidData | ErrorKind::UnexpectedEof => Some(ErrorCode::DataParseFailed),
        ErrorKind::InvalidInput => Some(ErrorCode::InvalidInput),
        ErrorKind::OutOfMemory => Some(ErrorCode::RenderOutOfMemory),
        _ => None,
    }
}
