use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AppError, RecoveryStrategy};

/// Advisory UI action for an error; never performed by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryActionKind {
    AutoRetry,
    UseCache,
    SwitchOffline,
    PromptReload,
    ManualRetry,
    NoAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryAction {
    pub action: RecoveryActionKind,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub delay: Option<Duration>,
    pub message: String,
}

/// Map an error's recovery strategy to the action the presentation layer should offer
pub fn recovery_action_for(error: &AppError) -> RecoveryAction {
    let (action, delay, message) = match error.recovery_strategy() {
        RecoveryStrategy::Retry => (
            RecoveryActionKind::AutoRetry,
            Some(Duration::from_secs(1)),
            "Retrying automatically...",
        ),
        RecoveryStrategy::RetryWithBackoff => (
            RecoveryActionKind::AutoRetry,
            Some(Duration::from_secs(2)),
            "Retrying shortly...",
        ),
        RecoveryStrategy::UseCached => (
            RecoveryActionKind::UseCache,
            None,
            "Showing saved content.",
        ),
        RecoveryStrategy::OfflineMode => (
            RecoveryActionKind::SwitchOffline,
            None,
            "Switching to offline mode.",
        ),
        RecoveryStrategy::Reload => (
            RecoveryActionKind::PromptReload,
            None,
            "Please reload to continue.",
        ),
        RecoveryStrategy::ManualRetry => (
            RecoveryActionKind::ManualRetry,
            None,
            "Please try again.",
        ),
        RecoveryStrategy::ContactSupport => (
            RecoveryActionKind::NoAction,
            None,
            "If this keeps happening, please contact support.",
        ),
        RecoveryStrategy::None => (RecoveryActionKind::NoAction, None, ""),
    };

    RecoveryAction {
        action,
        delay,
        message: message.to_string(),
    }
}
