//! Explicit registry of the resilience services
//!
//! A [`ResilienceContext`] owns one logger, one cache, one offline queue, one
//! notification center and the process-wide capture handle, all wired to the
//! same classifier and connectivity source. Hosts build one per application;
//! tests build one per case.

use futures::future::{AbortHandle, BoxFuture};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::boundary::{Boundary, FallbackLevel, SurfaceBoundary};
use crate::config::BulwarkConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivitySource};
use crate::error::{AppError, Classifier, ContextMap, RawFailure, Result, RuleTable};
use crate::logging::{ErrorLogger, GlobalCapture, TelemetrySink};
use crate::notify::{NotificationCenter, RetryCallback, Route};
use crate::recovery::{
    retry_with_backoff, CacheOptions, OfflineQueue, PipelineOptions, RecoveryCache,
    ResiliencePipeline, RetryOptions,
};
use crate::storage::KeyValueStore;

/// Builder for [`ResilienceContext`]
#[derive(Default)]
pub struct ResilienceContextBuilder {
    config: BulwarkConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    connectivity: Option<Arc<dyn ConnectivitySource>>,
    rules: Option<RuleTable>,
    query: Option<String>,
}

impl ResilienceContextBuilder {
    pub fn config(mut self, config: BulwarkConfig) -> Self {
        self.config = config;
        self
    }

    /// Durable store for the error log and the debug preference
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

    /// Replace the built-in classification rule table
    pub fn rules(mut self, rules: RuleTable) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Launch query string, consulted once for `debug=`
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn build(self) -> ResilienceContext {
        let connectivity = self
            .connectivity
            .unwrap_or_else(|| Arc::new(ConnectivityMonitor::default()));

        let classifier = match self.rules {
            Some(rules) => Classifier::new().with_rules(rules),
            None => Classifier::new(),
        };

        let mut logger = ErrorLogger::builder()
            .config(self.config.logger.logger_config(self.query))
            .classifier(Arc::new(classifier))
            .connectivity(Arc::clone(&connectivity));
        if let Some(store) = self.store {
            logger = logger.store(store);
        }
        if let Some(sink) = self.telemetry {
            logger = logger.telemetry(sink);
        }
        let logger = Arc::new(logger.build());

        let cache = RecoveryCache::new(self.config.cache.capacity, Arc::clone(&logger));
        let offline = OfflineQueue::new(
            self.config.offline.queue_config(),
            Arc::clone(&connectivity),
            Arc::clone(&logger),
        );
        let pipeline = ResiliencePipeline::new(Arc::clone(&logger), cache.clone(), offline.clone());
        let notifications = Arc::new(NotificationCenter::new(
            self.config.notifications.clone(),
            Arc::clone(&logger),
        ));
        let capture = GlobalCapture::new(Arc::clone(&logger));

        ResilienceContext {
            config: self.config,
            logger,
            connectivity,
            cache,
            offline,
            pipeline,
            notifications,
            capture,
            watchers: Vec::new(),
        }
    }
}

pub struct ResilienceContext {
    config: BulwarkConfig,
    logger: Arc<ErrorLogger>,
    connectivity: Arc<dyn ConnectivitySource>,
    cache: RecoveryCache,
    offline: OfflineQueue,
    pipeline: ResiliencePipeline,
    notifications: Arc<NotificationCenter>,
    capture: GlobalCapture,
    watchers: Vec<JoinHandle<()>>,
}

impl fmt::Debug for ResilienceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilienceContext")
            .field("logger", &self.logger)
            .field("online", &self.connectivity.is_online())
            .field("cache", &self.cache)
            .field("offline", &self.offline)
            .field("watchers", &self.watchers.len())
            .finish_non_exhaustive()
    }
}

impl Default for ResilienceContext {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ResilienceContext {
    pub fn builder() -> ResilienceContextBuilder {
        ResilienceContextBuilder::default()
    }

    /// Start the background watchers: the offline queue drains on every
    /// reconnect and the notification banner follows connectivity.
    /// Must be called from inside a tokio runtime. Calling it again is a no-op.
    pub fn start(&mut self) {
        if !self.watchers.is_empty() {
            return;
        }
        self.watchers.push(self.offline.watch());
        self.watchers
            .push(self.notifications.watch_connectivity(self.connectivity.as_ref()));
        info!(session_id = %self.logger.session_id(), "Resilience context started");
    }

    /// Stop the watchers, wait for in-flight cache refreshes and remove the
    /// panic capture
    pub async fn shutdown(&mut self) {
        for watcher in self.watchers.drain(..) {
            watcher.abort();
        }
        self.cache.settle().await;
        self.capture.uninstall();
        info!(session_id = %self.logger.session_id(), "Resilience context stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.watchers.is_empty()
    }

    pub fn config(&self) -> &BulwarkConfig {
        &self.config
    }

    pub fn logger(&self) -> &Arc<ErrorLogger> {
        &self.logger
    }

    pub fn classifier(&self) -> &Classifier {
        self.logger.classifier()
    }

    pub fn connectivity(&self) -> &Arc<dyn ConnectivitySource> {
        &self.connectivity
    }

    pub fn cache(&self) -> &RecoveryCache {
        &self.cache
    }

    pub fn offline_queue(&self) -> &OfflineQueue {
        &self.offline
    }

    pub fn pipeline(&self) -> &ResiliencePipeline {
        &self.pipeline
    }

    pub fn notifications(&self) -> &Arc<NotificationCenter> {
        &self.notifications
    }

    pub fn global_capture(&self) -> &GlobalCapture {
        &self.capture
    }

    /// Classify without logging
    pub fn classify(&self, raw: impl Into<RawFailure>) -> AppError {
        self.logger.classifier().classify(raw)
    }

    /// Classify and log
    pub fn capture(&self, raw: impl Into<RawFailure>) -> AppError {
        self.logger.capture(raw, ContextMap::new())
    }

    /// Classify, log and route to the notification center
    pub fn report(
        &self,
        raw: impl Into<RawFailure>,
        on_retry: Option<RetryCallback>,
    ) -> (AppError, Route) {
        self.notifications.capture(raw, on_retry)
    }

    /// Retry options seeded from the configuration
    pub fn retry_options(&self) -> RetryOptions {
        self.config.retry.options()
    }

    /// Cache options seeded from the configuration
    pub fn cache_options(&self) -> CacheOptions {
        self.config.cache.options()
    }

    /// Pipeline options for `label` with configured retry and cache defaults
    pub fn pipeline_options<T>(&self, label: impl Into<String>) -> PipelineOptions<T> {
        let mut options = PipelineOptions::new(label).with_retry(self.retry_options());
        options.cache = self.cache_options();
        options
    }

    /// Retry `operation` with the configured backoff. The final error is
    /// logged before it is returned.
    pub async fn retry<T, E, F, Fut>(&self, label: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<RawFailure>,
    {
        self.retry_with(label, &self.retry_options(), operation).await
    }

    pub async fn retry_with<T, E, F, Fut>(
        &self,
        label: &str,
        options: &RetryOptions,
        operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<RawFailure>,
    {
        let result = retry_with_backoff(self.logger.classifier(), options, operation).await;
        if let Err(error) = &result {
            self.logger.log(error.clone(), operation_metadata(label));
        }
        result
    }

    /// Serve `key` from the cache with the configured TTL
    pub async fn cached<T, E, F, Fut>(&self, key: &str, operation: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<RawFailure> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        self.cache
            .get_or_fetch(key, operation, &self.cache_options())
            .await
    }

    /// Run `operation` online, or return `fallback` and queue the call
    pub async fn with_offline_support<T, E, F, Fut>(
        &self,
        label: &str,
        operation: F,
        fallback: impl FnOnce() -> T + Send + 'static,
    ) -> Result<T>
    where
        T: Send + 'static,
        E: Into<RawFailure> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        self.offline
            .run(label, operation, Some(Box::new(fallback)), true)
            .await
    }

    /// Run through the composite pipeline
    pub async fn run<T, E, F, Fut>(&self, options: PipelineOptions<T>, operation: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<RawFailure> + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        self.pipeline.run(options, operation).await
    }

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
        self.pipeline.run_abortable(options, operation)
    }

    pub fn boundary(&self, name: impl Into<String>, level: FallbackLevel) -> Boundary {
        Boundary::new(name, level, Arc::clone(&self.logger))
    }

    pub fn surface_boundary(
        &self,
        name: impl Into<String>,
        level: FallbackLevel,
    ) -> SurfaceBoundary {
        SurfaceBoundary::new(name, level, Arc::clone(&self.logger))
    }

    /// Spawn a task whose failure is logged as an unhandled rejection
    pub fn spawn_observed<F, T, E>(&self, future: F) -> JoinHandle<Option<T>>
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<RawFailure> + Send + 'static,
    {
        self.capture.spawn_observed(future)
    }

    /// Drop cached values, queued operations, log entries and notifications
    pub fn reset(&self) {
        self.cache.clear();
        let dropped = self.offline.clear();
        self.logger.clear();
        self.notifications.reset();
        debug!(dropped_operations = dropped, "Resilience context reset");
    }
}

impl Drop for ResilienceContext {
    fn drop(&mut self) {
        for watcher in &self.watchers {
            watcher.abort();
        }
    }
}

fn operation_metadata(label: &str) -> ContextMap {
    let mut metadata = ContextMap::new();
    metadata.insert("operation".into(), label.into());
    metadata
}
