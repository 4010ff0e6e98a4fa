//! Composite resilience pipeline
//!
//! The layering is fixed:
//!
//! ```text
//! offline support ─► cache with fallback ─► retry with backoff ─► operation
//! ```
//!
//! Offline support can intercept before any network or cache work happens. A
//! cache hit short-circuits retries entirely. A cache miss runs the retried
//! operation.

use futures::future::{abortable, AbortHandle, BoxFuture};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::cache::{CacheOptions, RecoveryCache};
use super::offline::{OfflineFallback, OfflineQueue};
use super::retry::{retry_with_backoff, RetryOptions};
use crate::error::{AppError, ContextMap, RawFailure, Result};
use crate::logging::ErrorLogger;

type Layer<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T>> + Send>;

/// Per-call options for [`ResiliencePipeline::run`]
pub struct PipelineOptions<T> {
    /// Name used in logs and in offline queue entries
    pub label: String,
    pub retry: RetryOptions,
    /// Cache key; the cache layer is skipped when `None`
    pub cache_key: Option<String>,
    pub cache: CacheOptions,
    pub offline_fallback: Option<OfflineFallback<T>>,
    pub queue_for_later: bool,
}

impl<T> fmt::Debug for PipelineOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOptions")
            .field("label", &self.label)
            .field("retry", &self.retry)
            .field("cache_key", &self.cache_key)
            .field("cache", &self.cache)
            .field("offline_fallback", &self.offline_fallback.is_some())
            .field("queue_for_later", &self.queue_for_later)
            .finish()
    }
}

impl<T> PipelineOptions<T> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            retry: RetryOptions::default(),
            cache_key: None,
            cache: CacheOptions::default(),
            offline_fallback: None,
            queue_for_later: true,
        }
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn cached(mut self, key: impl Into<String>, options: CacheOptions) -> Self {
        self.cache_key = Some(key.into());
        self.cache = options;
        self
    }

    pub fn with_offline_fallback(mut self, fallback: impl FnOnce() -> T + Send + 'static) -> Self {
        self.offline_fallback = Some(Box::new(fallback));
        self
    }

    pub fn queue_for_later(mut self, queue: bool) -> Self {
        self.queue_for_later = queue;
        self
    }
}

#[derive(Clone)]
pub struct ResiliencePipeline {
    logger: Arc<ErrorLogger>,
    cache: RecoveryCache,
    offline: OfflineQueue,
}

impl fmt::Debug for ResiliencePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResiliencePipeline")
            .field("cache", &self.cache)
            .field("offline", &self.offline)
            .finish_non_exhaustive()
    }
}

impl ResiliencePipeline {
    pub fn new(logger: Arc<ErrorLogger>, cache: RecoveryCache, offline: OfflineQueue) -> Self {
        Self {
            logger,
            cache,
            offline,
        }
    }

    /// Run `operation` through every configured layer. A failure that
    /// escapes the pipeline is logged once before it is returned.
    pub async fn run<T, E, F, Fut>(&self, options: PipelineOptions<T>, operation: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<RawFailure> + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let PipelineOptions {
            label,
            retry,
            cache_key,
            cache,
            offline_fallback,
            queue_for_later,
        } = options;

        let classifier = Arc::clone(self.logger.classifier());
        let retried: Layer<T> = Box::new(move || {
            async move { retry_with_backoff(&classifier, &retry, operation).await }.boxed()
        });

        let cached: Layer<T> = match cache_key {
            Some(key) => {
                let store = self.cache.clone();
                Box::new(move || {
                    async move { store.get_or_fetch(&key, retried, &cache).await }.boxed()
                })
            }
            None => retried,
        };

        let result = self
            .offline
            .run(&label, cached, offline_fallback, queue_for_later)
            .await;

        if let Err(error) = &result {
            let mut metadata = ContextMap::new();
            metadata.insert("operation".into(), label.clone().into());
            self.logger.log(error.clone(), metadata);
        }
        result
    }

    /// Like [`run`](Self::run), but the call can be abandoned through the
    /// returned handle. An aborted call resolves to `OPERATION_CANCELLED`.
    ///
    /// Cache writes and queue entries made before the abort are kept.
    pub fn run_abortable<T, E, F, Fut>(
        &self,
        options: PipelineOptions<T>,
        operation: F,
    ) -> (BoxFuture<'static, Result<T>>, AbortHandle)
    where
        T: Clone + Send + Sync + 'static,
        E: Into<RawFailure> + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let label = options.label.clone();
        let pipeline = self.clone();
        let (future, handle) = abortable(async move { pipeline.run(options, operation).await });

        let future = async move {
            match future.await {
                Ok(result) => result,
                Err(_aborted) => {
                    debug!(operation = %label, "Pipeline call aborted");
                    Err(AppError::cancelled(&label))
                }
            }
        }
        .boxed();

        (future, handle)
    }

    pub fn cache(&self) -> &RecoveryCache {
        &self.cache
    }

    pub fn offline(&self) -> &OfflineQueue {
        &self.offline
    }
}
