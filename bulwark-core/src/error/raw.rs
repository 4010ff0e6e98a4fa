//! Intake type for failures that have not been classified yet
//!
//! Everything that can go wrong inside a wrapped operation is funneled into a
//! [`RawFailure`] before it reaches the classifier. Typed failures (io error
//! kinds, elapsed timers, task panics) are kept typed so the classifier can map
//! them without looking at message text.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use super::types::{AppError, ErrorCause};

/// A failure as it was caught, before classification
pub enum RawFailure {
    /// Already classified; classification is a no-op
    Classified(AppError),
    /// An io error with a meaningful `ErrorKind`
    Io(std::io::Error),
    /// A timer elapsed before the operation finished
    Elapsed,
    /// A panic payload, rendered to text
    Panic(String),
    /// A task was cancelled before it produced a value
    Cancelled,
    /// Any other error value
    Native(ErrorCause),
    /// Bare message text with no error value behind it
    Message(String),
}

impl RawFailure {
    /// Wrap an arbitrary error value
    pub fn native<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        RawFailure::Native(Arc::new(err))
    }

    /// Render a panic payload the way `std` does in its default hook
    pub fn from_panic_payload(payload: &(dyn Any + Send)) -> Self {
        RawFailure::Panic(panic_message(payload))
    }

    /// The diagnostic text the heuristic rules look at
    pub fn message(&self) -> String {
        match self {
            RawFailure::Classified(err) => err.message().to_string(),
            RawFailure::Io(err) => err.to_string(),
            RawFailure::Elapsed => "deadline has elapsed".to_string(),
            RawFailure::Panic(message) => message.clone(),
            RawFailure::Cancelled => "task was cancelled".to_string(),
            RawFailure::Native(err) => {
                let mut message = err.to_string();
                let mut source = err.source();
                while let Some(inner) = source {
                    message.push_str(": ");
                    message.push_str(&inner.to_string());
                    source = inner.source();
                }
                message
            }
            RawFailure::Message(message) => message.clone(),
        }
    }

    /// The original failure, when there is an error value to keep
    pub(crate) fn into_cause(self) -> Option<ErrorCause> {
        match self {
            RawFailure::Io(err) => Some(Arc::new(err)),
            RawFailure::Native(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Debug for RawFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawFailure::Classified(err) => f.debug_tuple("Classified").field(err).finish(),
            RawFailure::Io(err) => f.debug_tuple("Io").field(err).finish(),
            RawFailure::Elapsed => f.write_str("Elapsed"),
            RawFailure::Panic(message) => f.debug_tuple("Panic").field(message).finish(),
            RawFailure::Cancelled => f.write_str("Cancelled"),
            RawFailure::Native(err) => f.debug_tuple("Native").field(&err.to_string()).finish(),
            RawFailure::Message(message) => f.debug_tuple("Message").field(message).finish(),
        }
    }
}

impl fmt::Display for RawFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Extract the text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

impl From<AppError> for RawFailure {
    fn from(err: AppError) -> Self {
        RawFailure::Classified(err)
    }
}

impl From<String> for RawFailure {
    fn from(message: String) -> Self {
        RawFailure::Message(message)
    }
}

impl From<&str> for RawFailure {
    fn from(message: &str) -> Self {
        RawFailure::Message(message.to_string())
    }
}

impl From<std::io::Error> for RawFailure {
    fn from(err: std::io::Error) -> Self {
        // An io::Error may carry an AppError built by a lower layer
        if err
            .get_ref()
            .map(|inner| inner.is::<AppError>())
            .unwrap_or(false)
        {
            if let Some(inner) = err.into_inner() {
                if let Ok(app) = inner.downcast::<AppError>() {
                    return RawFailure::Classified(*app);
                }
            }
            return RawFailure::Message("io error with unreadable payload".to_string());
        }
        RawFailure::Io(err)
    }
}

impl From<serde_json::Error> for RawFailure {
    fn from(err: serde_json::Error) -> Self {
        RawFailure::native(err)
    }
}

impl From<tokio::time::error::Elapsed> for RawFailure {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        RawFailure::Elapsed
    }
}

impl From<tokio::task::JoinError> for RawFailure {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            RawFailure::Cancelled
        } else {
            match err.try_into_panic() {
                Ok(payload) => RawFailure::Panic(panic_message(payload.as_ref())),
                Err(err) => RawFailure::native(err),
            }
        }
    }
}

impl From<Box<dyn StdError + Send + Sync + 'static>> for RawFailure {
    fn from(err: Box<dyn StdError + Send + Sync + 'static>) -> Self {
        match err.downcast::<AppError>() {
            Ok(app) => RawFailure::Classified(*app),
            Err(other) => match other.downcast::<std::io::Error>() {
                Ok(io) => RawFailure::from(*io),
                Err(other) => RawFailure::Native(Arc::from(other)),
            },
        }
    }
}

impl From<anyhow::Error> for RawFailure {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<AppError>() {
            Ok(app) => RawFailure::Classified(app),
            Err(other) => {
                let boxed: Box<dyn StdError + Send + Sync + 'static> = other.into();
                RawFailure::from(boxed)
            }
        }
    }
}

impl From<futures::future::Aborted> for RawFailure {
    fn from(_: futures::future::Aborted) -> Self {
        RawFailure::Cancelled
    }
}
