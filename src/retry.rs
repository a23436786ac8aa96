// Bounded retry with exponential backoff and jitter around supplier calls.
// Retry policy lives here and nowhere else; call sites only supply the
// operation and (optionally) a classification override.

use crate::supplier::SupplierError;
use std::future::Future;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Terminal,
}

/// The attempt count is always reported, success or failure; callers surface
/// it for diagnostics and the event trail.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, SupplierError>,
    pub attempts: u32,
}

pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Exponential backoff with jitter to avoid thundering herd on a
    /// recovering supplier.
    pub fn calculate_backoff(&self, retry_attempt: u32) -> Duration {
        let base_backoff_ms = (self.config.initial_backoff_ms as f64
            * self.config.backoff_multiplier.powf(retry_attempt as f64))
        .min(self.config.max_backoff_ms as f64);

        let jitter = rand::random::<f64>() * self.config.jitter_factor * base_backoff_ms;
        let backoff_ms = base_backoff_ms * (1.0 - self.config.jitter_factor / 2.0) + jitter;

        Duration::from_millis(backoff_ms as u64)
    }

    /// Runs `op` with the default classification from the error taxonomy.
    pub async fn execute<T, F, Fut>(
        &self,
        deadline: Option<SystemTime>,
        op: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SupplierError>>,
    {
        self.execute_classified(deadline, op, |error| {
            if error.is_retryable() {
                ErrorClass::Retryable
            } else {
                ErrorClass::Terminal
            }
        })
        .await
    }

    /// Runs `op` up to `max_attempts` times. Only Retryable-classified
    /// errors are retried; a Terminal error surfaces immediately with the
    /// attempt count so far. After exhaustion the last error is returned,
    /// never swallowed. A caller deadline aborts the in-flight attempt and
    /// all remaining ones with `SupplierError::DeadlineExceeded`.
    pub async fn execute_classified<T, F, Fut, C>(
        &self,
        deadline: Option<SystemTime>,
        mut op: F,
        classify: C,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SupplierError>>,
        C: Fn(&SupplierError) -> ErrorClass,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0u32;

        loop {
            if deadline_elapsed(deadline) {
                return RetryOutcome {
                    result: Err(SupplierError::DeadlineExceeded),
                    attempts,
                };
            }

            attempts += 1;
            let attempt_result = match time_remaining(deadline) {
                Some(remaining) => match tokio::time::timeout(remaining, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(SupplierError::DeadlineExceeded),
                },
                None => op().await,
            };

            match attempt_result {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                    }
                }
                Err(error) => {
                    let retryable =
                        classify(&error) == ErrorClass::Retryable && attempts < max_attempts;
                    if !retryable {
                        return RetryOutcome {
                            result: Err(error),
                            attempts,
                        };
                    }

                    let backoff = self.calculate_backoff(attempts - 1);
                    let nap = match time_remaining(deadline) {
                        Some(remaining) => backoff.min(remaining),
                        None => backoff,
                    };
                    tracing::warn!(
                        attempt = attempts,
                        backoff_ms = nap.as_millis() as u64,
                        error = %error,
                        "transient supplier failure, backing off"
                    );
                    tokio::time::sleep(nap).await;
                }
            }
        }
    }
}

fn time_remaining(deadline: Option<SystemTime>) -> Option<Duration> {
    deadline.map(|d| {
        d.duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    })
}

fn deadline_elapsed(deadline: Option<SystemTime>) -> bool {
    time_remaining(deadline).map_or(false, |remaining| remaining.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio_test::assert_ok;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }

    fn transient() -> SupplierError {
        SupplierError::Api {
            status_code: 503,
            message: "service unavailable".to_string(),
            retryable: true,
        }
    }

    /// Fails `failures` times with a transient error, then succeeds.
    fn flaky_op(
        calls: Arc<AtomicU32>,
        failures: u32,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = Result<u32, SupplierError>> + Send>>
    {
        move || {
            let calls = calls.clone();
            Box::pin(async move {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call <= failures {
                    Err(transient())
                } else {
                    Ok(call)
                }
            })
        }
    }

    #[tokio::test]
    async fn success_short_circuits_on_first_attempt() {
        let executor = RetryExecutor::new(fast_config(3));
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = executor.execute(None, flaky_op(calls.clone(), 0)).await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let executor = RetryExecutor::new(fast_config(4));
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = executor.execute(None, flaky_op(calls.clone(), 2)).await;

        // Two transient failures, success on the third attempt.
        assert_eq!(outcome.attempts, 3);
        tokio_test::assert_ok!(outcome.result);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error_and_attempt_count() {
        let executor = RetryExecutor::new(fast_config(3));
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = executor.execute(None, flaky_op(calls.clone(), 10)).await;

        assert_eq!(outcome.attempts, 3);
        assert!(matches!(
            outcome.result,
            Err(SupplierError::Api { status_code: 503, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_error_is_never_retried() {
        let executor = RetryExecutor::new(fast_config(5));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome: RetryOutcome<u32> = executor
            .execute(None, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SupplierError::Unavailable("room gone".to_string()))
                }
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert!(matches!(outcome.result, Err(SupplierError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn custom_classifier_overrides_taxonomy() {
        let executor = RetryExecutor::new(fast_config(4));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        // Taxonomy says retryable; the classifier says terminal.
        let outcome: RetryOutcome<u32> = executor
            .execute_classified(
                None,
                move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(transient())
                    }
                },
                |_| ErrorClass::Terminal,
            )
            .await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_deadline_aborts_before_first_attempt() {
        let executor = RetryExecutor::new(fast_config(3));
        let deadline = SystemTime::now() - Duration::from_secs(1);
        let outcome: RetryOutcome<u32> = executor
            .execute(Some(deadline), || async { Ok(1) })
            .await;

        assert_eq!(outcome.attempts, 0);
        assert!(matches!(
            outcome.result,
            Err(SupplierError::DeadlineExceeded)
        ));
    }

    #[tokio::test]
    async fn deadline_cuts_off_slow_attempt() {
        let executor = RetryExecutor::new(fast_config(3));
        let deadline = SystemTime::now() + Duration::from_millis(50);
        let outcome: RetryOutcome<u32> = executor
            .execute(Some(deadline), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert!(matches!(
            outcome.result,
            Err(SupplierError::DeadlineExceeded)
        ));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let executor = RetryExecutor::new(RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        });

        assert_eq!(executor.calculate_backoff(0), Duration::from_millis(100));
        assert_eq!(executor.calculate_backoff(1), Duration::from_millis(200));
        assert_eq!(executor.calculate_backoff(2), Duration::from_millis(400));
        // Capped by max_backoff_ms.
        assert_eq!(executor.calculate_backoff(10), Duration::from_millis(1000));
    }
}
