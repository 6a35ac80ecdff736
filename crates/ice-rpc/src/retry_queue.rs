//! Per-communicator retry coordination (spec.md §4.6 "RetryQueue", §7).
//!
//! The original design describes a timer wheel feeding a dedicated retry
//! queue; here each retry is instead just a `tokio::time::sleep` awaited
//! in place on the invoking task. Tokio's own timer driver is already a
//! hierarchical wheel, so layering a second one on top would only
//! reimplement what the runtime gives for free — see DESIGN.md.

use std::time::Duration;

use ice_core::retry::{default_retry_intervals, retry_decision, RetryDecision};
use ice_core::LocalError;

/// Re-runs `attempt` according to the configured backoff schedule,
/// respecting the idempotency rule in spec.md §7: a non-idempotent
/// operation may only retry on a failure known to have happened before
/// any bytes were sent, while an idempotent one may retry on any
/// retryable failure kind regardless of how far the send got.
pub struct RetryQueue {
    intervals: Vec<Duration>,
}

impl RetryQueue {
    pub fn new(intervals: Vec<Duration>) -> Self {
        Self { intervals }
    }

    /// Re-runs `attempt` until it succeeds, runs out of retries, or hits a
    /// failure that retrying can't fix. `on_retry` is called between
    /// attempts (typically `RequestHandler::clear_cache`) so the next
    /// attempt re-resolves its destination instead of reusing a connection
    /// or cached handler that just failed.
    pub async fn run<F, Fut, T>(&self, idempotent: bool, mut attempt: F, mut on_retry: impl FnMut()) -> Result<T, LocalError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, LocalError>>,
    {
        let mut tried = 0usize;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !idempotent && !err.is_pre_send_kind() {
                        return Err(err);
                    }
                    match retry_decision(&err, tried, &self.intervals) {
                        RetryDecision::RetryAfter(delay) => {
                            tried += 1;
                            on_retry();
                            if !delay.is_zero() {
                                tokio::time::sleep(delay).await;
                            }
                        }
                        RetryDecision::GiveUp => return Err(err),
                    }
                }
            }
        }
    }
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new(default_retry_intervals())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn retries_an_idempotent_operation_until_it_succeeds() {
        let queue = RetryQueue::new(vec![Duration::from_millis(0), Duration::from_millis(0)]);
        let calls = AtomicUsize::new(0);
        let retries = AtomicUsize::new(0);
        let result = queue
            .run(
                true,
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(LocalError::ConnectionLost("reset".into()))
                        } else {
                            Ok::<_, LocalError>(42)
                        }
                    }
                },
                || {
                    retries.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn never_retries_a_non_idempotent_operation_past_the_send() {
        let queue = RetryQueue::new(default_retry_intervals());
        let calls = AtomicUsize::new(0);
        let result = queue
            .run(
                false,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(LocalError::ConnectionLost("reset after send".into())) }
                },
                || {},
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_a_non_idempotent_operation_on_a_pre_send_failure() {
        let queue = RetryQueue::new(vec![Duration::from_millis(0)]);
        let calls = AtomicUsize::new(0);
        let result = queue
            .run(
                false,
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(LocalError::ConnectFailed("refused".into()))
                        } else {
                            Ok::<_, LocalError>(())
                        }
                    }
                },
                || {},
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn default_uses_the_standard_backoff_schedule() {
        let queue = RetryQueue::default();
        assert_eq!(queue.intervals, default_retry_intervals());
    }
}
