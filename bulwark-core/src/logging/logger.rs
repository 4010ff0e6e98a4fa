//! Error logger: ring buffer, aggregate stats, persistence and export
//!
//! Every classified failure in the crate ends up in [`ErrorLogger::log`]. The
//! logger keeps the newest entries in a [`RingBuffer`], maintains running
//! [`ErrorStats`], mirrors both into a [`KeyValueStore`] on every write and
//! forwards a flat event to the telemetry sink. None of these side channels
//! can fail the call that logged the error.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::ring_buffer::RingBuffer;
use super::stats::ErrorStats;
use super::telemetry::{self, TelemetryEvent, TelemetrySink};
use crate::connectivity::ConnectivitySource;
use crate::error::{AppError, Classifier, ContextMap, RawFailure, Severity};
use crate::storage::KeyValueStore;

/// Key under which the logger snapshot is persisted
pub const LOG_STORAGE_KEY: &str = "bulwark.error_log";

/// Key under which the debug preference is persisted
pub const DEBUG_STORAGE_KEY: &str = "bulwark.debug";

pub const DEFAULT_LOG_CAPACITY: usize = 100;
pub const DEFAULT_RECENT_CAPACITY: usize = 10;

/// Log level of an entry, derived from the error's severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Warn,
    Error,
    Critical,
}

impl From<Severity> for LogLevel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Low => LogLevel::Debug,
            Severity::Medium => LogLevel::Warn,
            Severity::High => LogLevel::Error,
            Severity::Critical => LogLevel::Critical,
        }
    }
}

/// Static facts about the host, recorded on every entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    pub url: Option<String>,
    pub user_agent: Option<String>,
    pub platform: Option<String>,
    pub app_version: Option<String>,
}

/// Host facts at the moment an entry was written
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSnapshot {
    #[serde(flatten)]
    pub info: EnvironmentInfo,
    pub online: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: Uuid,
    pub level: LogLevel,
    pub error: AppError,
    #[serde(default)]
    pub metadata: ContextMap,
    pub session_id: String,
    pub environment: EnvironmentSnapshot,
    pub timestamp: DateTime<Utc>,
}

/// Transportable snapshot of the logger; also the persisted form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogExport {
    pub session_id: String,
    pub exported_at: DateTime<Utc>,
    pub entries: Vec<LogEntry>,
    pub stats: ErrorStats,
}

/// Origin of a failure that was not caught by the code that raised it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureSource {
    UncaughtPanic,
    UnhandledRejection,
}

impl CaptureSource {
    pub fn tag(&self) -> &'static str {
        match self {
            CaptureSource::UncaughtPanic => "uncaught_panic",
            CaptureSource::UnhandledRejection => "unhandled_rejection",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub capacity: usize,
    pub recent_capacity: usize,
    /// Explicit debug setting; wins over query string and stored preference
    pub debug: Option<bool>,
    /// Query string of the launching URL, consulted once for `debug=`
    pub query: Option<String>,
    pub persist: bool,
    pub storage_key: String,
    pub environment: EnvironmentInfo,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LOG_CAPACITY,
            recent_capacity: DEFAULT_RECENT_CAPACITY,
            debug: None,
            query: None,
            persist: true,
            storage_key: LOG_STORAGE_KEY.to_string(),
            environment: EnvironmentInfo::default(),
        }
    }
}

struct LoggerState {
    entries: RingBuffer<LogEntry>,
    stats: ErrorStats,
    /// Bumped on every change that must reach the store
    revision: u64,
}

/// Snapshot encoded under the state lock, written after it is released
struct PendingWrite {
    revision: u64,
    encoded: Option<String>,
}

pub struct ErrorLogger {
    config: LoggerConfig,
    session_id: String,
    debug: AtomicBool,
    state: Mutex<LoggerState>,
    /// Revision last written to the store. Store writes run outside the
    /// state lock so a failure raised by the store can be logged again.
    persisted: ReentrantMutex<Cell<u64>>,
    classifier: Arc<Classifier>,
    store: Option<Arc<dyn KeyValueStore>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    connectivity: Option<Arc<dyn ConnectivitySource>>,
}

impl fmt::Debug for ErrorLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorLogger")
            .field("session_id", &self.session_id)
            .field("debug", &self.is_debug())
            .field("entries", &self.state.lock().entries.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ErrorLogger`]
#[derive(Default)]
pub struct ErrorLoggerBuilder {
    config: LoggerConfig,
    classifier: Option<Arc<Classifier>>,
    store: Option<Arc<dyn KeyValueStore>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    connectivity: Option<Arc<dyn ConnectivitySource>>,
}

impl ErrorLoggerBuilder {
    pub fn config(mut self, config: LoggerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn classifier(mut self, classifier: Arc<Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn connectivity(mut self, source: Arc<dyn ConnectivitySource>) -> Self {
        self.connectivity = Some(source);
        self
    }

    /// Restore any persisted snapshot and resolve the debug flag
    pub fn build(self) -> ErrorLogger {
        let config = self.config;
        let store = self.store.filter(|_| config.persist);

        let restored = store
            .as_deref()
            .and_then(|store| restore_snapshot(store, &config.storage_key));
        let state = match restored {
            Some(snapshot) => LoggerState {
                entries: RingBuffer::from_items(config.capacity, snapshot.entries),
                stats: snapshot.stats,
                revision: 0,
            },
            None => LoggerState {
                entries: RingBuffer::new(config.capacity),
                stats: ErrorStats::default(),
                revision: 0,
            },
        };

        let debug = resolve_debug(&config, store.as_deref());

        ErrorLogger {
            session_id: Uuid::new_v4().to_string(),
            debug: AtomicBool::new(debug),
            state: Mutex::new(state),
            persisted: ReentrantMutex::new(Cell::new(0)),
            classifier: self.classifier.unwrap_or_default(),
            store,
            telemetry: self.telemetry,
            connectivity: self.connectivity,
            config,
        }
    }
}

impl ErrorLogger {
    pub fn builder() -> ErrorLoggerBuilder {
        ErrorLoggerBuilder::default()
    }

    /// A logger with default configuration and no collaborators
    pub fn in_memory() -> Self {
        Self::builder().build()
    }

    /// Record an already classified error
    pub fn log(&self, error: AppError, metadata: ContextMap) -> LogEntry {
        let entry = LogEntry {
            id: Uuid::new_v4(),
            level: LogLevel::from(error.severity()),
            error,
            metadata,
            session_id: self.session_id.clone(),
            environment: self.environment_snapshot(),
            timestamp: Utc::now(),
        };

        let pending = {
            let mut state = self.state.lock();
            state.entries.push(entry.clone());
            state
                .stats
                .record(&entry.error, self.config.recent_capacity);
            self.prepare_write(&mut state, true)
        };
        if let Some(pending) = pending {
            self.write(pending);
        }

        self.emit(&entry);

        if let Some(sink) = &self.telemetry {
            let event = TelemetryEvent::from_error(
                &entry.error,
                &self.session_id,
                entry.environment.info.url.clone(),
                entry.environment.info.user_agent.clone(),
            );
            telemetry::dispatch(Arc::clone(sink), event);
        }

        entry
    }

    /// Classify a raw failure and record it
    pub fn capture(&self, raw: impl Into<RawFailure>, metadata: ContextMap) -> AppError {
        let error = self.classifier.classify(raw);
        self.log(error.clone(), metadata);
        error
    }

    /// Classify and record a failure nobody caught, tagged with its origin
    pub fn capture_tagged(
        &self,
        raw: impl Into<RawFailure>,
        source: CaptureSource,
        location: Option<String>,
    ) -> AppError {
        let mut metadata = ContextMap::new();
        metadata.insert("source".into(), source.tag().into());
        if let Some(location) = location {
            metadata.insert("location".into(), location.into());
        }
        self.capture(raw, metadata)
    }

    /// All buffered entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.state.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// The newest errors, newest first
    pub fn recent(&self) -> Vec<AppError> {
        self.state.lock().stats.recent.clone()
    }

    pub fn stats(&self) -> ErrorStats {
        self.state.lock().stats.clone()
    }

    pub fn export(&self) -> LogExport {
        let state = self.state.lock();
        self.snapshot(&state)
    }

    pub fn export_json(&self) -> Result<String, AppError> {
        serde_json::to_string_pretty(&self.export())
            .map_err(|e| self.classifier.classify(e))
    }

    /// Drop every entry and all stats, including the persisted copy
    pub fn clear(&self) {
        let pending = {
            let mut state = self.state.lock();
            state.entries.clear();
            state.stats = ErrorStats::default();
            self.prepare_write(&mut state, false)
        };
        if let Some(pending) = pending {
            self.write(pending);
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    /// Change the debug flag, optionally saving it as the stored preference
    pub fn set_debug(&self, enabled: bool, persist: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
        if !persist {
            return;
        }
        if let Some(store) = &self.store {
            let value = if enabled { "true" } else { "false" };
            if let Err(e) = store.set(DEBUG_STORAGE_KEY, value) {
                debug!(error = %e, "Failed to persist debug preference");
            }
        }
    }

    pub fn classifier(&self) -> &Arc<Classifier> {
        &self.classifier
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().entries.capacity()
    }

    fn environment_snapshot(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            info: self.config.environment.clone(),
            online: self.connectivity.as_ref().map(|c| c.is_online()),
        }
    }

    fn snapshot(&self, state: &LoggerState) -> LogExport {
        LogExport {
            session_id: self.session_id.clone(),
            exported_at: Utc::now(),
            entries: state.entries.iter().cloned().collect(),
            stats: state.stats.clone(),
        }
    }

    /// Stamp a new revision and encode the snapshot. `None` when there is
    /// no store. A pending write without a snapshot removes the stored copy.
    fn prepare_write(&self, state: &mut LoggerState, keep: bool) -> Option<PendingWrite> {
        self.store.as_ref()?;
        state.revision += 1;
        let encoded = if keep {
            match serde_json::to_string(&self.snapshot(state)) {
                Ok(encoded) => Some(encoded),
                Err(e) => {
                    debug!(error = %e, "Failed to encode error log snapshot");
                    return None;
                }
            }
        } else {
            None
        };
        Some(PendingWrite {
            revision: state.revision,
            encoded,
        })
    }

    /// Write a prepared snapshot unless a newer one already landed
    fn write(&self, pending: PendingWrite) {
        let Some(store) = &self.store else {
            return;
        };
        let written = self.persisted.lock();
        if written.get() >= pending.revision {
            return;
        }
        let result = match &pending.encoded {
            Some(encoded) => store.set(&self.config.storage_key, encoded),
            None => store.remove(&self.config.storage_key),
        };
        if let Err(e) = result {
            debug!(error = %e, "Failed to persist error log snapshot");
        }
        written.set(written.get().max(pending.revision));
    }

    fn emit(&self, entry: &LogEntry) {
        let err = &entry.error;
        match entry.level {
            LogLevel::Debug => {
                if self.is_debug() {
                    debug!(
                        code = %err.code(),
                        category = %err.category(),
                        session_id = %self.session_id,
                        "{}",
                        err.message()
                    );
                }
            }
            LogLevel::Warn => warn!(
                code = %err.code(),
                category = %err.category(),
                session_id = %self.session_id,
                "{}",
                err.message()
            ),
            LogLevel::Error => error!(
                code = %err.code(),
                category = %err.category(),
                session_id = %self.session_id,
                "{}",
                err.message()
            ),
            LogLevel::Critical => error!(
                critical = true,
                code = %err.code(),
                category = %err.category(),
                session_id = %self.session_id,
                "{}",
                err.message()
            ),
        }
    }
}

fn restore_snapshot(store: &dyn KeyValueStore, key: &str) -> Option<LogExport> {
    let raw = match store.get(key) {
        Ok(raw) => raw?,
        Err(e) => {
            debug!(error = %e, "Failed to read persisted error log");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            debug!(error = %e, "Persisted error log is corrupt, starting empty");
            None
        }
    }
}

/// Config wins, then a one-time query parameter, then the stored preference
fn resolve_debug(config: &LoggerConfig, store: Option<&dyn KeyValueStore>) -> bool {
    if let Some(debug) = config.debug {
        return debug;
    }
    if let Some(debug) = config.query.as_deref().and_then(debug_from_query) {
        return debug;
    }
    store
        .and_then(|store| store.get(DEBUG_STORAGE_KEY).ok().flatten())
        .map(|value| value == "true")
        .unwrap_or(false)
}

/// Read a `debug=` parameter out of a URL query string
pub fn debug_from_query(query: &str) -> Option<bool> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
        .find(|(key, _)| *key == "debug")
        .and_then(|(_, value)| match value {
            "1" | "true" | "" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        })
}
