//! Error logging and telemetry
//!
//! The [`ErrorLogger`] is the single sink for classified failures. Boundaries,
//! the recovery engine and [`GlobalCapture`] all report through it.

pub mod global;
pub mod logger;
pub mod ring_buffer;
pub mod stats;
pub mod subscriber;
pub mod telemetry;

pub use global::GlobalCapture;
pub use logger::{
    debug_from_query, CaptureSource, EnvironmentInfo, EnvironmentSnapshot, ErrorLogger,
    ErrorLoggerBuilder, LogEntry, LogExport, LogLevel, LoggerConfig, DEBUG_STORAGE_KEY,
    DEFAULT_LOG_CAPACITY, DEFAULT_RECENT_CAPACITY, LOG_STORAGE_KEY,
};
pub use ring_buffer::RingBuffer;
pub use stats::ErrorStats;
pub use subscriber::init_tracing;
pub use telemetry::{RecordingSink, TelemetryEvent, TelemetrySink, TracingSink};
