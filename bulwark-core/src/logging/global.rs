//! Capture of failures nobody handled
//!
//! Two process-wide signals are funneled into the logger. Uncaught panics go
//! through a chained panic hook. Spawned tasks that end in `Err` or panic are
//! observed through [`GlobalCapture::spawn_observed`]. Both are classified
//! exactly like explicitly caught failures and tagged with their origin.

use std::cell::Cell;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;
use tokio::task::JoinHandle;
use tracing::debug;

use super::logger::{CaptureSource, ErrorLogger};
use crate::error::{panic_message, RawFailure};

thread_local! {
    static CONTAINMENT_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Decrements the containment depth when dropped, unwinding included
struct ContainmentGuard;

impl ContainmentGuard {
    fn enter() -> Self {
        CONTAINMENT_DEPTH.with(|depth| depth.set(depth.get() + 1));
        ContainmentGuard
    }
}

impl Drop for ContainmentGuard {
    fn drop(&mut self) {
        CONTAINMENT_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn is_contained() -> bool {
    CONTAINMENT_DEPTH.with(|depth| depth.get() > 0)
}

/// Run `f` as a scope whose panics are caught and recorded by the caller.
/// The panic hook does not record them a second time.
pub(crate) fn contain<R>(f: impl FnOnce() -> R) -> R {
    let _guard = ContainmentGuard::enter();
    f()
}

/// Async counterpart of [`contain`]: every poll of `future` runs contained.
pub(crate) fn contained<F: Future>(future: F) -> impl Future<Output = F::Output> {
    let mut future = Box::pin(future);
    futures::future::poll_fn(move |cx| -> Poll<F::Output> {
        contain(|| future.as_mut().poll(cx))
    })
}

#[derive(Debug, Clone)]
pub struct GlobalCapture {
    logger: Arc<ErrorLogger>,
    active: Arc<AtomicBool>,
}

impl GlobalCapture {
    pub fn new(logger: Arc<ErrorLogger>) -> Self {
        Self {
            logger,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Chain a panic hook that records uncaught panics, then runs the
    /// previously installed hook. Installing twice is a no-op.
    pub fn install(&self) {
        if self.active.swap(true, Ordering::SeqCst) {
            return;
        }

        let previous = std::panic::take_hook();
        let logger = Arc::clone(&self.logger);
        let active = Arc::clone(&self.active);

        std::panic::set_hook(Box::new(move |info| {
            if active.load(Ordering::SeqCst) && !is_contained() {
                let location = info
                    .location()
                    .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
                logger.capture_tagged(
                    RawFailure::Panic(panic_message(info.payload())),
                    CaptureSource::UncaughtPanic,
                    location,
                );
            }
            previous(info);
        }));
        debug!(session_id = %self.logger.session_id(), "Panic capture installed");
    }

    /// Stop recording panics. The chained hook keeps delegating to the
    /// hook that was installed before it.
    pub fn uninstall(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            debug!(session_id = %self.logger.session_id(), "Panic capture removed");
        }
    }

    pub fn is_installed(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Spawn `future` and record its failure if it ends in `Err` or panics.
    ///
    /// A panic is recorded once, from the task's join error. The returned
    /// handle yields `None` when the task failed.
    pub fn spawn_observed<F, T, E>(&self, future: F) -> JoinHandle<Option<T>>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<RawFailure> + Send + 'static,
    {
        let logger = Arc::clone(&self.logger);
        let task = tokio::spawn(contained(future));

        tokio::spawn(async move {
            match task.await {
                Ok(Ok(value)) => Some(value),
                Ok(Err(e)) => {
                    logger.capture_tagged(e, CaptureSource::UnhandledRejection, None);
                    None
                }
                Err(join_error) => {
                    logger.capture_tagged(join_error, CaptureSource::UnhandledRejection, None);
                    None
                }
            }
        })
    }
}
