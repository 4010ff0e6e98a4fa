//! Cache with fallback and stale-while-revalidate
//!
//! Entries are type-erased so one cache can serve every caller of a context.
//! A key read back with a different type than it was written with is treated
//! as a miss.
//!
//! Background refreshes run as tracked tasks. A refresh that fails is logged
//! exactly once by the task itself; [`RecoveryCache::settle`] waits for every
//! refresh that is still running.

use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ContextMap, RawFailure, Result};
use crate::logging::global::contained;
use crate::logging::ErrorLogger;

pub const DEFAULT_CACHE_CAPACITY: usize = 100;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub ttl: Duration,
    pub stale_while_revalidate: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            stale_while_revalidate: true,
        }
    }
}

impl CacheOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_stale_while_revalidate(mut self, enabled: bool) -> Self {
        self.stale_while_revalidate = enabled;
        self
    }
}

struct CacheEntry {
    data: Arc<dyn Any + Send + Sync>,
    written_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.written_at) < self.ttl
    }
}

enum Lookup<T> {
    Fresh(T),
    Stale(T),
    Miss,
}

struct CacheInner {
    capacity: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
    refreshing: Mutex<HashSet<String>>,
    refreshes: Mutex<Vec<JoinHandle<()>>>,
    logger: Arc<ErrorLogger>,
}

/// Keyed cache shared by every clone
#[derive(Clone)]
pub struct RecoveryCache {
    inner: Arc<CacheInner>,
}

impl fmt::Debug for RecoveryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryCache")
            .field("capacity", &self.inner.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl RecoveryCache {
    pub fn new(capacity: usize, logger: Arc<ErrorLogger>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                capacity: capacity.max(1),
                entries: Mutex::new(HashMap::new()),
                refreshing: Mutex::new(HashSet::new()),
                refreshes: Mutex::new(Vec::new()),
                logger,
            }),
        }
    }

    /// Return the cached value for `key`, calling `operation` only when needed.
    ///
    /// - fresh hit: cached value, `operation` is not called
    /// - cold key: `operation` result is stored and returned; its error propagates
    /// - stale hit with revalidation: stale value now, one background refresh
    /// - stale hit without revalidation: `operation` now, stale value on failure
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        key: &str,
        operation: F,
        options: &CacheOptions,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<RawFailure> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        match self.lookup::<T>(key) {
            Lookup::Fresh(value) => {
                debug!(key, "Cache hit");
                Ok(value)
            }
            Lookup::Stale(stale) if options.stale_while_revalidate => {
                debug!(key, "Serving stale value while revalidating");
                self.spawn_refresh(key, operation, options.ttl);
                Ok(stale)
            }
            Lookup::Stale(stale) => match operation().await {
                Ok(value) => {
                    self.store(key, value.clone(), options.ttl);
                    Ok(value)
                }
                Err(raw) => {
                    let error = self.inner.logger.classifier().classify(raw);
                    warn!(key, code = %error.code(), "Refresh failed, serving stale value");
                    self.inner.logger.log(error, cache_metadata(key, true));
                    Ok(stale)
                }
            },
            Lookup::Miss => {
                debug!(key, "Cache miss");
                match operation().await {
                    Ok(value) => {
                        self.store(key, value.clone(), options.ttl);
                        Ok(value)
                    }
                    Err(raw) => Err(self.inner.logger.classifier().classify(raw)),
                }
            }
        }
    }

    /// Cached value regardless of freshness
    pub fn peek<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.inner
            .entries
            .lock()
            .get(key)
            .and_then(|entry| entry.data.downcast_ref::<T>().cloned())
    }

    /// Write `value` under `key`, evicting the oldest entry when full
    pub fn store<T: Send + Sync + 'static>(&self, key: &str, value: T, ttl: Duration) {
        let mut entries = self.inner.entries.lock();
        if !entries.contains_key(key) && entries.len() >= self.inner.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.written_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                debug!(key = %oldest, "Evicted oldest cache entry");
            }
        }
        entries.insert(
            key.to_string(),
            CacheEntry {
                data: Arc::new(value),
                written_at: Instant::now(),
                ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.entries.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.inner.entries.lock().clear();
    }

    /// Drop every stale entry, returning how many were removed
    pub fn purge_stale(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    pub fn is_refreshing(&self, key: &str) -> bool {
        self.inner.refreshing.lock().contains(key)
    }

    /// Wait until no background refresh is running
    pub async fn settle(&self) {
        loop {
            let pending = std::mem::take(&mut *self.inner.refreshes.lock());
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    debug!(error = %e, "Cache refresh task did not complete");
                }
            }
        }
    }

    fn lookup<T: Clone + 'static>(&self, key: &str) -> Lookup<T> {
        let now = Instant::now();
        let entries = self.inner.entries.lock();
        let Some(entry) = entries.get(key) else {
            return Lookup::Miss;
        };
        match entry.data.downcast_ref::<T>() {
            Some(value) if entry.is_fresh(now) => Lookup::Fresh(value.clone()),
            Some(value) => Lookup::Stale(value.clone()),
            None => {
                debug!(key, "Cached value has a different type, treating as miss");
                Lookup::Miss
            }
        }
    }

    fn spawn_refresh<T, E, F, Fut>(&self, key: &str, operation: F, ttl: Duration)
    where
        T: Send + Sync + 'static,
        E: Into<RawFailure> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        if !self.inner.refreshing.lock().insert(key.to_string()) {
            debug!(key, "Refresh already in flight");
            return;
        }

        let cache = self.clone();
        let key = key.to_string();
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(contained(async move { operation().await }))
                .catch_unwind()
                .await;
            let logger = &cache.inner.logger;
            match outcome {
                Ok(Ok(value)) => {
                    cache.store(&key, value, ttl);
                    debug!(key = %key, "Background refresh stored new value");
                }
                Ok(Err(raw)) => {
                    let error = logger.classifier().classify(raw);
                    warn!(key = %key, code = %error.code(), "Background refresh failed");
                    logger.log(error, cache_metadata(&key, true));
                }
                Err(payload) => {
                    let error = logger
                        .classifier()
                        .classify(RawFailure::from_panic_payload(payload.as_ref()));
                    warn!(key = %key, "Background refresh panicked");
                    logger.log(error, cache_metadata(&key, true));
                }
            }
            cache.inner.refreshing.lock().remove(&key);
        });

        let mut refreshes = self.inner.refreshes.lock();
        refreshes.retain(|handle| !handle.is_finished());
        refreshes.push(handle);
    }
}

fn cache_metadata(key: &str, stale: bool) -> ContextMap {
    let mut metadata = ContextMap::new();
    metadata.insert("cache_key".into(), key.into());
    metadata.insert("stale".into(), stale.into());
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, ErrorCode};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cache(capacity: usize) -> (RecoveryCache, Arc<ErrorLogger>) {
        let logger = Arc::new(ErrorLogger::in_memory());
        (RecoveryCache::new(capacity, logger.clone()), logger)
    }

    fn counting_fetch(
        calls: &Arc<AtomicU32>,
        value: &'static str,
    ) -> impl FnOnce() -> futures::future::Ready<std::result::Result<String, AppError>> + Send + 'static
    {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(value.to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_then_warm_read() {
        let (cache, _) = cache(10);
        let calls = Arc::new(AtomicU32::new(0));
        let options = CacheOptions::default().with_ttl(Duration::from_secs(60));

        let first = cache
            .get_or_fetch("atlas", counting_fetch(&calls, "v1"), &options)
            .await
            .unwrap();
        let second = cache
            .get_or_fetch("atlas", counting_fetch(&calls, "v2"), &options)
            .await
            .unwrap();

        assert_eq!(first, "v1");
        assert_eq!(second, "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_failure_propagates() {
        let (cache, _) = cache(10);
        let result: Result<String> = cache
            .get_or_fetch(
                "atlas",
                || async { Err::<String, _>("connection reset by peer") },
                &CacheOptions::default(),
            )
            .await;

        assert_eq!(result.unwrap_err().code(), ErrorCode::NetworkRequestFailed);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_hit_revalidates_once_in_background() {
        let (cache, _) = cache(10);
        let calls = Arc::new(AtomicU32::new(0));
        let options = CacheOptions::default().with_ttl(Duration::from_secs(1));

        cache.store("atlas", "old".to_string(), options.ttl);
        tokio::time::advance(Duration::from_secs(2)).await;

        let value = cache
            .get_or_fetch("atlas", counting_fetch(&calls, "new"), &options)
            .await
            .unwrap();
        assert_eq!(value, "old");

        cache.settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.peek::<String>("atlas").as_deref(), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_stale_reads_share_one_refresh() {
        let (cache, _) = cache(10);
        let calls = Arc::new(AtomicU32::new(0));
        let options = CacheOptions::default().with_ttl(Duration::from_secs(1));

        cache.store("atlas", "old".to_string(), options.ttl);
        tokio::time::advance(Duration::from_secs(2)).await;

        let slow = {
            let calls = calls.clone();
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, AppError>("new".to_string())
            }
        };
        let first = cache.get_or_fetch("atlas", slow.clone(), &options).await.unwrap();
        assert!(cache.is_refreshing("atlas"));
        let second = cache.get_or_fetch("atlas", slow, &options).await.unwrap();

        assert_eq!((first.as_str(), second.as_str()), ("old", "old"));
        cache.settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_refreshing("atlas"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_refresh_failure_is_logged_not_propagated() {
        let (cache, logger) = cache(10);
        let options = CacheOptions::default().with_ttl(Duration::from_secs(1));

        cache.store("atlas", "old".to_string(), options.ttl);
        tokio::time::advance(Duration::from_secs(2)).await;

        let value = cache
            .get_or_fetch(
                "atlas",
                || async { Err::<String, _>(AppError::from_code(ErrorCode::NetworkServerError)) },
                &options,
            )
            .await
            .unwrap();
        cache.settle().await;

        assert_eq!(value, "old");
        let entries = logger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].metadata["cache_key"], "atlas");
        assert_eq!(cache.peek::<String>("atlas").as_deref(), Some("old"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_without_revalidation_falls_back_on_failure() {
        let (cache, logger) = cache(10);
        let options = CacheOptions::default()
            .with_ttl(Duration::from_secs(1))
            .with_stale_while_revalidate(false);

        cache.store("atlas", "old".to_string(), options.ttl);
        tokio::time::advance(Duration::from_secs(2)).await;

        let value = cache
            .get_or_fetch(
                "atlas",
                || async { Err::<String, _>("503 service unavailable") },
                &options,
            )
            .await
            .unwrap();
        assert_eq!(value, "old");
        assert_eq!(logger.len(), 1);

        let calls = Arc::new(AtomicU32::new(0));
        let value = cache
            .get_or_fetch("atlas", counting_fetch(&calls, "new"), &options)
            .await
            .unwrap();
        assert_eq!(value, "new");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest_written() {
        let (cache, _) = cache(2);
        cache.store("a", 1u32, DEFAULT_CACHE_TTL);
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.store("b", 2u32, DEFAULT_CACHE_TTL);
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.store("c", 3u32, DEFAULT_CACHE_TTL);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek::<u32>("a"), None);
        assert_eq!(cache.peek::<u32>("c"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_and_invalidate() {
        let (cache, _) = cache(10);
        cache.store("short", 1u32, Duration::from_secs(1));
        cache.store("long", 2u32, Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.purge_stale(), 1);
        assert!(cache.invalidate("long"));
        assert!(!cache.invalidate("long"));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_mismatch_is_a_miss() {
        let (cache, _) = cache(10);
        cache.store("atlas", 7u32, DEFAULT_CACHE_TTL);

        let calls = Arc::new(AtomicU32::new(0));
        let value = cache
            .get_or_fetch("atlas", counting_fetch(&calls, "text"), &CacheOptions::default())
            .await
            .unwrap();
        assert_eq!(value, "text");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
