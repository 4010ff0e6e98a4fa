//! Notification center: toasts, the global error slot and the connectivity banner
//!
//! Routing follows the propagation policy of the taxonomy:
//!
//! | error                          | route                          |
//! |--------------------------------|--------------------------------|
//! | low severity or validation     | inline, handled by the caller  |
//! | medium or high severity        | toast with optional retry      |
//! | critical severity              | global error slot              |

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::connectivity::{next_edge, ConnectivityEvent, ConnectivitySource};
use crate::error::{AppError, Category, ContextMap, RawFailure, Severity};
use crate::logging::ErrorLogger;

pub const DEFAULT_MAX_TOASTS: usize = 10;

pub type RetryCallback = Arc<dyn Fn() + Send + Sync>;

/// Where a reported error ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Inline,
    Toast(Uuid),
    Global,
}

#[derive(Clone)]
pub struct ErrorNotification {
    pub id: Uuid,
    pub error: AppError,
    pub dismissed: bool,
    pub auto_hide: bool,
    pub duration: Duration,
    pub created_at: Instant,
    pub on_retry: Option<RetryCallback>,
}

impl fmt::Debug for ErrorNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorNotification")
            .field("id", &self.id)
            .field("code", &self.error.code())
            .field("dismissed", &self.dismissed)
            .field("auto_hide", &self.auto_hide)
            .field("duration", &self.duration)
            .field("retryable", &self.on_retry.is_some())
            .finish()
    }
}

impl ErrorNotification {
    /// Text for the toast body
    pub fn message(&self) -> &str {
        self.error.user_message()
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.auto_hide && now.saturating_duration_since(self.created_at) >= self.duration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerState {
    Hidden,
    Offline,
    /// Connectivity came back; hides itself after the banner duration
    Restored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Active toasts kept before the oldest is dropped
    pub max_toasts: usize,

    /// How long an auto-hiding toast stays up
    #[serde(with = "humantime_serde")]
    pub toast_duration: Duration,

    /// How long the "back online" banner stays up
    #[serde(with = "humantime_serde")]
    pub restored_banner_duration: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_toasts: DEFAULT_MAX_TOASTS,
            toast_duration: Duration::from_secs(5),
            restored_banner_duration: Duration::from_secs(3),
        }
    }
}

struct CenterState {
    toasts: VecDeque<ErrorNotification>,
    global: Option<AppError>,
    banner: BannerState,
    banner_since: Instant,
}

pub struct NotificationCenter {
    config: NotificationConfig,
    state: Mutex<CenterState>,
    logger: Arc<ErrorLogger>,
}

impl fmt::Debug for NotificationCenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("NotificationCenter")
            .field("toasts", &state.toasts.len())
            .field("global", &state.global.as_ref().map(|e| e.code()))
            .field("banner", &state.banner)
            .finish()
    }
}

impl NotificationCenter {
    pub fn new(config: NotificationConfig, logger: Arc<ErrorLogger>) -> Self {
        Self {
            config: NotificationConfig {
                max_toasts: config.max_toasts.max(1),
                ..config
            },
            state: Mutex::new(CenterState {
                toasts: VecDeque::new(),
                global: None,
                banner: BannerState::Hidden,
                banner_since: Instant::now(),
            }),
            logger,
        }
    }

    /// Route an already logged error to its presentation
    pub fn report(&self, error: &AppError, on_retry: Option<RetryCallback>) -> Route {
        if error.severity() == Severity::Low || error.category() == Category::Validation {
            return Route::Inline;
        }

        let mut state = self.state.lock();
        if error.is_critical() {
            state.global = Some(error.clone());
            debug!(code = %error.code(), "Global error slot set");
            return Route::Global;
        }

        let notification = ErrorNotification {
            id: Uuid::new_v4(),
            error: error.clone(),
            dismissed: false,
            auto_hide: error.severity() == Severity::Medium,
            duration: self.config.toast_duration,
            created_at: Instant::now(),
            on_retry: on_retry.filter(|_| error.retryable()),
        };
        let id = notification.id;

        state.toasts.push_back(notification);
        while state.toasts.len() > self.config.max_toasts {
            state.toasts.pop_front();
        }
        Route::Toast(id)
    }

    /// Classify, log and route a raw failure
    pub fn capture(
        &self,
        raw: impl Into<RawFailure>,
        on_retry: Option<RetryCallback>,
    ) -> (AppError, Route) {
        let error = self.logger.capture(raw, ContextMap::new());
        let route = self.report(&error, on_retry);
        (error, route)
    }

    /// Active toasts, oldest first
    pub fn toasts(&self) -> Vec<ErrorNotification> {
        self.state.lock().toasts.iter().cloned().collect()
    }

    /// Mark a toast dismissed and remove it
    pub fn dismiss(&self, id: Uuid) -> Option<ErrorNotification> {
        let mut state = self.state.lock();
        let index = state.toasts.iter().position(|n| n.id == id)?;
        let mut notification = state.toasts.remove(index)?;
        notification.dismissed = true;
        Some(notification)
    }

    /// Run the toast's retry callback and dismiss it
    pub fn retry(&self, id: Uuid) -> bool {
        let Some(notification) = self.dismiss(id) else {
            return false;
        };
        match notification.on_retry {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Remove auto-hiding toasts whose time is up and hide an expired
    /// restored banner. Returns the number of toasts removed.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();

        let before = state.toasts.len();
        state.toasts.retain(|n| !n.is_expired(now));

        if state.banner == BannerState::Restored
            && now.saturating_duration_since(state.banner_since)
                >= self.config.restored_banner_duration
        {
            state.banner = BannerState::Hidden;
            state.banner_since = now;
        }

        before - state.toasts.len()
    }

    pub fn global_error(&self) -> Option<AppError> {
        self.state.lock().global.clone()
    }

    pub fn clear_global_error(&self) -> Option<AppError> {
        self.state.lock().global.take()
    }

    pub fn banner(&self) -> BannerState {
        self.state.lock().banner
    }

    /// Update the banner from a connectivity edge
    pub fn connectivity_changed(&self, event: ConnectivityEvent) {
        let mut state = self.state.lock();
        let next = match (event, state.banner) {
            (ConnectivityEvent::Offline, _) => BannerState::Offline,
            (ConnectivityEvent::Online, BannerState::Offline) => BannerState::Restored,
            (ConnectivityEvent::Online, current) => current,
        };
        if next != state.banner {
            state.banner = next;
            state.banner_since = Instant::now();
        }
    }

    /// Spawn a task that keeps the banner in sync with `source`
    pub fn watch_connectivity(self: &Arc<Self>, source: &dyn ConnectivitySource) -> JoinHandle<()> {
        if !source.is_online() {
            self.connectivity_changed(ConnectivityEvent::Offline);
        }
        let center = Arc::clone(self);
        let mut receiver = source.subscribe();
        tokio::spawn(async move {
            while let Some(event) = next_edge(&mut receiver).await {
                center.connectivity_changed(event);
            }
        })
    }

    /// Drop every toast, the global error and the banner
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.toasts.clear();
        state.global = None;
        state.banner = BannerState::Hidden;
        state.banner_since = Instant::now();
    }
}
