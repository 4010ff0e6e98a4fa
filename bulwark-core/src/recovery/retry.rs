//! Retry with exponential backoff
//!
//! Attempts are strictly sequential. After each failure the error is
//! classified and the loop stops as soon as the error is not retryable or the
//! attempt budget (`max_retries + 1` calls) is spent.

use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{AppError, Classifier, RawFailure, Result};

/// Decides whether a classified error should be retried
pub type RetryPredicate = Arc<dyn Fn(&AppError) -> bool + Send + Sync>;

/// Observes each scheduled retry
pub type RetryObserver = Arc<dyn Fn(&RetryAttempt) + Send + Sync>;

/// A retry that is about to happen
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    /// 1-based retry number (the first retry is the second call)
    pub attempt: u32,
    pub delay: Duration,
    pub error: AppError,
}

#[derive(Clone)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Add up to 10% random jitter to every delay
    pub jitter: bool,
    /// Replaces the error's own `retryable` flag entirely when set
    pub retry_on: Option<RetryPredicate>,
    pub on_retry: Option<RetryObserver>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: true,
            retry_on: None,
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("jitter", &self.jitter)
            .field("retry_on", &self.retry_on.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryOptions {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn retry_on(
        mut self,
        predicate: impl Fn(&AppError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_on = Some(Arc::new(predicate));
        self
    }

    pub fn on_retry(mut self, observer: impl Fn(&RetryAttempt) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// `min(base_delay * backoff_factor^attempt, max_delay)` for a 0-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else if secs <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    fn should_retry(&self, error: &AppError) -> bool {
        match &self.retry_on {
            Some(predicate) => predicate(error),
            None => error.retryable(),
        }
    }

    /// Delay with jitter applied, never below `previous` and never above `max_delay`
    fn next_delay(&self, attempt: u32, previous: Duration) -> Duration {
        let delay = self.delay_for(attempt);
        let delay = if self.jitter {
            let fraction: f64 = rand::thread_rng().gen_range(0.0..=0.1);
            delay + delay.mul_f64(fraction)
        } else {
            delay
        };
        delay.min(self.max_delay).max(previous)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// runs out of attempts. The last classified error is returned on failure.
pub async fn retry_with_backoff<T, E, F, Fut>(
    classifier: &Classifier,
    options: &RetryOptions,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<RawFailure>,
{
    let mut attempt: u32 = 0;
    let mut previous_delay = Duration::ZERO;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(raw) => {
                let error = classifier.classify(raw);

                if !options.should_retry(&error) {
                    debug!(code = %error.code(), attempt = attempt + 1, "Error is not retryable");
                    return Err(error);
                }

                if attempt >= options.max_retries {
                    warn!(
                        code = %error.code(),
                        attempts = attempt + 1,
                        "Retry attempts exhausted"
                    );
                    return Err(error);
                }

                let delay = options.next_delay(attempt, previous_delay);
                previous_delay = delay;
                attempt += 1;

                debug!(
                    code = %error.code(),
                    attempt,
                    max_retries = options.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after failure"
                );

                if let Some(observer) = &options.on_retry {
                    observer(&RetryAttempt {
                        attempt,
                        delay,
                        error,
                    });
                }

                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn recording_options(max_retries: u32, delays: Arc<Mutex<Vec<Duration>>>) -> RetryOptions {
        RetryOptions::default()
            .with_max_retries(max_retries)
            .with_delays(Duration::from_millis(100), Duration::from_millis(350))
            .on_retry(move |attempt| delays.lock().push(attempt.delay))
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_retryable_error_exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let delays = Arc::new(Mutex::new(Vec::new()));
        let options = recording_options(3, delays.clone());

        let calls_clone = calls.clone();
        let result: Result<()> = retry_with_backoff(&Classifier::new(), &options, || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::from_code(ErrorCode::NetworkTimeout)) }
        })
        .await;

        assert_eq!(result.unwrap_err().code(), ErrorCode::NetworkTimeout);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let delays = delays.lock().clone();
        assert_eq!(delays.len(), 3);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(350)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let delays = Arc::new(Mutex::new(Vec::new()));
        let options = recording_options(2, delays.clone());

        let calls_clone = calls.clone();
        let result = retry_with_backoff(&Classifier::new(), &options, || {
            let n = calls_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("fetch failed")
                } else {
                    Ok("atlas")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "atlas");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(delays.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let options = RetryOptions::default().with_max_retries(5);

        let calls_clone = calls.clone();
        let result: Result<()> = retry_with_backoff(&Classifier::new(), &options, || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::from_code(ErrorCode::PermissionDenied)) }
        })
        .await;

        assert_eq!(result.unwrap_err().code(), ErrorCode::PermissionDenied);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_on_overrides_retryable_flag() {
        let calls = Arc::new(AtomicU32::new(0));
        let options = RetryOptions::default()
            .with_max_retries(2)
            .retry_on(|err| err.code() == ErrorCode::DataNotFound);

        let calls_clone = calls.clone();
        let result: Result<()> = retry_with_backoff(&Classifier::new(), &options, || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::from_code(ErrorCode::DataNotFound)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // And a retryable error the predicate rejects is not retried
        calls.store(0, Ordering::SeqCst);
        let calls_clone = calls.clone();
        let result: Result<()> = retry_with_backoff(&Classifier::new(), &options, || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::from_code(ErrorCode::NetworkTimeout)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_without_jitter_follow_backoff() {
        let options = RetryOptions::default().without_jitter();
        let start = tokio::time::Instant::now();

        let result: Result<()> = retry_with_backoff(&Classifier::new(), &options, || async {
            Err(AppError::from_code(ErrorCode::NetworkServerError))
        })
        .await;

        assert!(result.is_err());
        // 1s + 2s + 4s
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(7));
        assert!(elapsed < Duration::from_secs(8));
    }

    #[test]
    fn test_delay_for_is_capped() {
        let options = RetryOptions::default();
        assert_eq!(options.delay_for(0), Duration::from_secs(1));
        assert_eq!(options.delay_for(3), Duration::from_secs(8));
        assert_eq!(options.delay_for(10), Duration::from_secs(30));
        assert_eq!(options.delay_for(u32::MAX), Duration::from_secs(30));
    }

    proptest! {
        #[test]
        fn prop_jittered_delays_are_monotonic_and_capped(
            base_ms in 1u64..2_000,
            max_ms in 1u64..60_000,
            factor in 1.0f64..4.0,
            retries in 1u32..12,
        ) {
            let options = RetryOptions {
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms),
                backoff_factor: factor,
                ..Default::default()
            };

            let mut previous = Duration::ZERO;
            for attempt in 0..retries {
                let delay = options.next_delay(attempt, previous);
                prop_assert!(delay >= previous);
                prop_assert!(delay <= options.max_delay);
                previous = delay;
            }
        }
    }
}
