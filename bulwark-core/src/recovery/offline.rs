//! Offline support and the deferred operation queue
//!
//! While the connectivity source reports offline, an operation with a fallback
//! producer returns the fallback immediately and the real call is queued. The
//! queue is bounded and replayed FIFO, exactly once per item, on the next
//! online edge. Replay failures are logged and dropped.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connectivity::{next_edge, ConnectivitySource};
use crate::error::{AppError, ContextMap, RawFailure, Result};
use crate::logging::global::contained;
use crate::logging::ErrorLogger;

pub const DEFAULT_OFFLINE_CAPACITY: usize = 50;

/// A deferred call, replayed at most once
pub type QueuedOperation = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Synthetic value produced while offline
pub type OfflineFallback<T> = Box<dyn FnOnce() -> T + Send>;

/// What happens when an item is enqueued into a full queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    #[default]
    DropOldest,
    RejectNew,
}

#[derive(Debug, Clone)]
pub struct OfflineQueueConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for OfflineQueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_OFFLINE_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued { id: Uuid },
    QueuedDroppingOldest { id: Uuid, dropped: Uuid },
    Rejected,
}

impl EnqueueOutcome {
    pub fn is_queued(&self) -> bool {
        !matches!(self, EnqueueOutcome::Rejected)
    }
}

/// Result of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub executed: usize,
    pub failed: usize,
}

struct QueuedItem {
    id: Uuid,
    label: String,
    enqueued_at: DateTime<Utc>,
    operation: QueuedOperation,
}

struct OfflineInner {
    config: OfflineQueueConfig,
    items: Mutex<VecDeque<QueuedItem>>,
    drain_lock: tokio::sync::Mutex<()>,
    connectivity: Arc<dyn ConnectivitySource>,
    logger: Arc<ErrorLogger>,
}

#[derive(Clone)]
pub struct OfflineQueue {
    inner: Arc<OfflineInner>,
}

impl fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("config", &self.inner.config)
            .field("len", &self.len())
            .finish()
    }
}

impl OfflineQueue {
    pub fn new(
        config: OfflineQueueConfig,
        connectivity: Arc<dyn ConnectivitySource>,
        logger: Arc<ErrorLogger>,
    ) -> Self {
        let config = OfflineQueueConfig {
            capacity: config.capacity.max(1),
            ..config
        };
        Self {
            inner: Arc::new(OfflineInner {
                config,
                items: Mutex::new(VecDeque::new()),
                drain_lock: tokio::sync::Mutex::new(()),
                connectivity,
                logger,
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    /// Run `operation` when online. Offline, return the fallback (queueing the
    /// real call when `queue_for_later` is set) or fail with `NETWORK_OFFLINE`.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        operation: F,
        fallback: Option<OfflineFallback<T>>,
        queue_for_later: bool,
    ) -> Result<T>
    where
        T: Send + 'static,
        E: Into<RawFailure> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        if self.is_online() {
            return operation()
                .await
                .map_err(|raw| self.inner.logger.classifier().classify(raw));
        }

        let Some(fallback) = fallback else {
            debug!(operation = label, "Offline without fallback");
            return Err(AppError::offline(label));
        };

        if queue_for_later {
            let classifier = Arc::clone(self.inner.logger.classifier());
            self.enqueue(label, move || {
                async move {
                    operation()
                        .await
                        .map(|_| ())
                        .map_err(|raw| classifier.classify(raw))
                }
                .boxed()
            });
        }

        debug!(operation = label, queued = queue_for_later, "Offline, serving fallback");
        Ok(fallback())
    }

    /// Add a deferred call, applying the overflow policy when full
    pub fn enqueue<F>(&self, label: &str, operation: F) -> EnqueueOutcome
    where
        F: FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let item = QueuedItem {
            id,
            label: label.to_string(),
            enqueued_at: Utc::now(),
            operation: Box::new(operation),
        };

        let mut items = self.inner.items.lock();
        if items.len() < self.inner.config.capacity {
            items.push_back(item);
            return EnqueueOutcome::Queued { id };
        }

        match self.inner.config.overflow {
            OverflowPolicy::RejectNew => {
                warn!(
                    operation = label,
                    capacity = self.inner.config.capacity,
                    "Offline queue full, rejecting operation"
                );
                EnqueueOutcome::Rejected
            }
            OverflowPolicy::DropOldest => {
                let dropped = items.pop_front().map(|old| {
                    warn!(
                        operation = %old.label,
                        queued_at = %old.enqueued_at,
                        "Offline queue full, dropping oldest operation"
                    );
                    old.id
                });
                items.push_back(item);
                match dropped {
                    Some(dropped) => EnqueueOutcome::QueuedDroppingOldest { id, dropped },
                    None => EnqueueOutcome::Queued { id },
                }
            }
        }
    }

    /// Replay a snapshot of the queue in FIFO order.
    ///
    /// Items enqueued while the drain runs wait for the next pass. Drains
    /// never overlap.
    pub async fn drain(&self) -> DrainReport {
        let _guard = self.inner.drain_lock.lock().await;
        let snapshot = std::mem::take(&mut *self.inner.items.lock());
        let mut report = DrainReport::default();

        for item in snapshot {
            let QueuedItem {
                id,
                label,
                operation,
                ..
            } = item;
            let outcome = AssertUnwindSafe(contained(async move { operation().await }))
                .catch_unwind()
                .await;
            report.executed += 1;

            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error,
                Err(payload) => self
                    .inner
                    .logger
                    .classifier()
                    .classify(RawFailure::from_panic_payload(payload.as_ref())),
            };
            report.failed += 1;
            warn!(operation = %label, code = %error.code(), "Queued operation failed, discarding");
            let mut metadata = ContextMap::new();
            metadata.insert("offline_operation".into(), label.into());
            metadata.insert("queued_id".into(), id.to_string().into());
            self.inner.logger.log(error, metadata);
        }

        if report.executed > 0 {
            info!(executed = report.executed, failed = report.failed, "Offline queue drained");
        }
        report
    }

    /// Spawn a task that drains the queue on every offline to online edge
    ///
    /// Edges are coalesced: the task drains when the source is online at the
    /// moment it wakes. An online window shorter than one wake is not seen,
    /// and its queued items wait for the next online state.
    pub fn watch(&self) -> JoinHandle<()> {
        let queue = self.clone();
        let mut receiver = self.inner.connectivity.subscribe();
        tokio::spawn(async move {
            while next_edge(&mut receiver).await.is_some() {
                if queue.inner.connectivity.is_online() {
                    queue.drain().await;
                } else {
                    debug!(pending = queue.len(), "Still offline after wake");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.lock().is_empty()
    }

    /// Labels of queued operations, oldest first
    pub fn labels(&self) -> Vec<String> {
        self.inner
            .items
            .lock()
            .iter()
            .map(|item| item.label.clone())
            .collect()
    }

    /// Drop every queued operation without running it
    pub fn clear(&self) -> usize {
        let mut items = self.inner.items.lock();
        let dropped = items.len();
        items.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityMonitor;
    use crate::error::ErrorCode;

    fn setup(
        online: bool,
        config: OfflineQueueConfig,
    ) -> (OfflineQueue, ConnectivityMonitor, Arc<ErrorLogger>) {
        let monitor = ConnectivityMonitor::new(online);
        let logger = Arc::new(ErrorLogger::in_memory());
        let queue = OfflineQueue::new(config, Arc::new(monitor.clone()), logger.clone());
        (queue, monitor, logger)
    }

    fn recording(
        log: &Arc<Mutex<Vec<String>>>,
        label: &'static str,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static {
        let log = log.clone();
        move || {
            async move {
                log.lock().push(label.to_string());
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_offline_without_fallback_fails() {
        let (queue, _, _) = setup(false, OfflineQueueConfig::default());
        let result = queue
            .run("save-notes", || async { Ok::<_, AppError>(1) }, None, true)
            .await;

        assert_eq!(result.unwrap_err().code(), ErrorCode::NetworkOffline);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_offline_with_fallback_queues_real_call() {
        let (queue, _, _) = setup(false, OfflineQueueConfig::default());
        let value = queue
            .run(
                "save-notes",
                || async { Ok::<_, AppError>("synced") },
                Some(Box::new(|| "pending")),
                true,
            )
            .await
            .unwrap();

        assert_eq!(value, "pending");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.labels(), vec!["save-notes".to_string()]);
    }

    #[tokio::test]
    async fn test_fallback_without_queueing() {
        let (queue, _, _) = setup(false, OfflineQueueConfig::default());
        let value = queue
            .run(
                "save-notes",
                || async { Ok::<_, AppError>(2) },
                Some(Box::new(|| 0)),
                false,
            )
            .await
            .unwrap();

        assert_eq!(value, 0);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_online_runs_operation_directly() {
        let (queue, _, _) = setup(true, OfflineQueueConfig::default());
        let result = queue
            .run(
                "load",
                || async { Err::<u32, _>("dns lookup failed") },
                Some(Box::new(|| 0)),
                true,
            )
            .await;

        assert_eq!(result.unwrap_err().code(), ErrorCode::NetworkRequestFailed);
        assert!(queue.is_empty());
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_watch_drains_on_current_state_after_coalesced_edges() {
        let (queue, monitor, _) = setup(false, OfflineQueueConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.enqueue("sync-notes", recording(&log, "sync-notes"));
        let watcher = queue.watch();

        // Online for less than one wake: nothing replays against an offline source
        monitor.set_online(true);
        monitor.set_online(false);
        settle().await;
        assert_eq!(queue.len(), 1);
        assert!(log.lock().is_empty());

        monitor.set_online(true);
        monitor.set_online(false);
        monitor.set_online(true);
        settle().await;
        assert!(queue.is_empty());
        assert_eq!(*log.lock(), vec!["sync-notes".to_string()]);

        watcher.abort();
    }

    #[tokio::test]
    async fn test_drain_is_fifo_and_exactly_once() {
        let (queue, _, logger) = setup(false, OfflineQueueConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        queue.enqueue("a", recording(&log, "a"));
        queue.enqueue("fails", || async { Err(AppError::from_code(ErrorCode::NetworkServerError)) }.boxed());
        queue.enqueue("b", recording(&log, "b"));

        let report = queue.drain().await;
        assert_eq!(report, DrainReport { executed: 3, failed: 1 });
        assert_eq!(*log.lock(), vec!["a".to_string(), "b".to_string()]);
        assert!(queue.is_empty());
        assert_eq!(logger.entries()[0].metadata["offline_operation"], "fails");

        let report = queue.drain().await;
        assert_eq!(report, DrainReport::default());
        assert_eq!(log.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_items_enqueued_during_drain_wait_for_next_pass() {
        let (queue, _, _) = setup(false, OfflineQueueConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        let requeue = {
            let queue = queue.clone();
            let log = log.clone();
            move || {
                async move {
                    queue.enqueue("late", recording(&log, "late"));
                    Ok(())
                }
                .boxed()
            }
        };
        queue.enqueue("requeue", requeue);

        assert_eq!(queue.drain().await.executed, 1);
        assert_eq!(queue.len(), 1);
        assert!(log.lock().is_empty());

        assert_eq!(queue.drain().await.executed, 1);
        assert_eq!(*log.lock(), vec!["late".to_string()]);
    }

    #[tokio::test]
    async fn test_overflow_policies() {
        let config = OfflineQueueConfig {
            capacity: 2,
            overflow: OverflowPolicy::DropOldest,
        };
        let (queue, _, _) = setup(false, config);
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = queue.enqueue("1", recording(&log, "1"));
        queue.enqueue("2", recording(&log, "2"));
        let third = queue.enqueue("3", recording(&log, "3"));

        match (first, third) {
            (EnqueueOutcome::Queued { id }, EnqueueOutcome::QueuedDroppingOldest { dropped, .. }) => {
                assert_eq!(id, dropped)
            }
            other => panic!("unexpected outcomes: {:?}", other),
        }
        assert_eq!(queue.labels(), vec!["2".to_string(), "3".to_string()]);

        let config = OfflineQueueConfig {
            capacity: 1,
            overflow: OverflowPolicy::RejectNew,
        };
        let (queue, _, _) = setup(false, config);
        assert!(queue.enqueue("1", recording(&log, "1")).is_queued());
        assert_eq!(queue.enqueue("2", recording(&log, "2")), EnqueueOutcome::Rejected);
        assert_eq!(queue.labels(), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_watch_drains_on_reconnect() {
        let (queue, monitor, _) = setup(false, OfflineQueueConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let watcher = queue.watch();

        queue.enqueue("a", recording(&log, "a"));
        monitor.set_online(true);

        for _ in 0..50 {
            if queue.is_empty() && !log.lock().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(*log.lock(), vec!["a".to_string()]);
        watcher.abort();
    }
}
