//! Client-side fault resilience
//!
//! Failures are classified into a fixed taxonomy, contained by boundaries,
//! recovered from where possible (retry, cache, offline queue) and logged with
//! enough context to diagnose later.
//!
//! Everything hangs off a [`ResilienceContext`]; there are no global singletons
//! apart from the optional panic hook installed by
//! [`GlobalCapture`](logging::GlobalCapture).

pub mod boundary;
pub mod config;
pub mod connectivity;
pub mod context;
pub mod error;
pub mod logging;
pub mod notify;
pub mod recovery;
pub mod storage;

pub use boundary::{Boundary, FallbackDescriptor, FallbackLevel, Rendered, SurfaceBoundary};
pub use config::{BulwarkConfig, ConfigError};
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor, ConnectivitySource};
pub use context::{ResilienceContext, ResilienceContextBuilder};
pub use error::{AppError, BulwarkResult, Classifier, ErrorCode, RawFailure, Result};
pub use logging::ErrorLogger;
pub use notify::{NotificationCenter, Route};
pub use recovery::{PipelineOptions, ResiliencePipeline};
pub use storage::{KeyValueStore, MemoryStore, RedbStore, StoreError};
