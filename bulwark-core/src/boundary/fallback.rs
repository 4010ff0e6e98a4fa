use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, ErrorCode};

/// How much of the surface a fallback takes over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackLevel {
    /// Full-surface takeover, offers reload
    Global,
    /// Compact inline block, offers retry
    #[default]
    Section,
    /// Single-line inline notice, no action
    Component,
}

impl FallbackLevel {
    pub fn primary_action(&self) -> Option<FallbackAction> {
        match self {
            FallbackLevel::Global => Some(FallbackAction::Reload),
            FallbackLevel::Section => Some(FallbackAction::Retry),
            FallbackLevel::Component => None,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            FallbackLevel::Global => "Something went wrong",
            FallbackLevel::Section => "This section couldn't be displayed",
            FallbackLevel::Component => "Unavailable",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FallbackLevel::Global => "global",
            FallbackLevel::Section => "section",
            FallbackLevel::Component => "component",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackAction {
    Reload,
    Retry,
    /// Switch to the non-accelerated presentation path
    UseNonAcceleratedView,
    Dismiss,
}

/// Everything a host needs to draw a fallback view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackDescriptor {
    pub level: FallbackLevel,
    pub error_id: Uuid,
    pub code: ErrorCode,
    pub title: String,
    /// Always the error's user message
    pub message: String,
    pub primary_action: Option<FallbackAction>,
    pub secondary_action: Option<FallbackAction>,
    /// Diagnostic text, present only in debug mode
    pub details: Option<String>,
}

impl FallbackDescriptor {
    pub fn new(level: FallbackLevel, error_id: Uuid, error: &AppError, debug: bool) -> Self {
        let details = debug.then(|| match error.stack() {
            Some(stack) if stack != error.message() => format!("{}\n\n{}", error, stack),
            _ => error.to_string(),
        });

        Self {
            level,
            error_id,
            code: error.code(),
            title: level.title().to_string(),
            message: error.user_message().to_string(),
            primary_action: level.primary_action(),
            secondary_action: None,
            details,
        }
    }

    pub fn with_secondary_action(mut self, action: Option<FallbackAction>) -> Self {
        self.secondary_action = action;
        self
    }
}
