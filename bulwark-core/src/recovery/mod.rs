//! Recovery engine
//!
//! Four primitives wrap a zero-argument async operation: retry with backoff,
//! cache with fallback, offline support, and the composite pipeline that layers
//! the other three in a fixed order. [`recovery_action_for`] maps an error to
//! an advisory action for the presentation layer.

pub mod action;
pub mod cache;
pub mod offline;
pub mod pipeline;
pub mod retry;

pub use action::{recovery_action_for, RecoveryAction, RecoveryActionKind};
pub use cache::{CacheOptions, RecoveryCache, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
pub use offline::{
    DrainReport, EnqueueOutcome, OfflineFallback, OfflineQueue, OfflineQueueConfig,
    OverflowPolicy, QueuedOperation, DEFAULT_OFFLINE_CAPACITY,
};
pub use pipeline::{PipelineOptions, ResiliencePipeline};
pub use retry::{retry_with_backoff, RetryAttempt, RetryObserver, RetryOptions, RetryPredicate};
