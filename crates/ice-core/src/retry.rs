//! Retry interval table and per-failure retry decision (spec.md §4.6,
//! §7). Holding a connection, a timer, and a request queue is the job of
//! the runtime crate's `RetryQueue`; this module only answers "is this
//! worth retrying, and after how long".

use std::time::Duration;

use crate::error::LocalError;

/// Default backoff schedule (spec.md §6 `RetryIntervals`): a short series
/// of immediate-ish retries followed by widening gaps, matching the
/// original source's default of `0 1 5 10`.
pub fn default_retry_intervals() -> Vec<Duration> {
    vec![
        Duration::from_millis(0),
        Duration::from_secs(1),
        Duration::from_secs(5),
        Duration::from_secs(10),
    ]
}

/// Whether an invocation may be retried given `attempt` (0-based, the
/// number of attempts already made) against the configured schedule, and
/// whether the failure is of a retryable kind (spec.md §4.6, §7). The
/// caller must additionally confirm the operation is idempotent before
/// retrying once bytes may have reached the peer (spec.md §7: retry after
/// partial send is only safe for idempotent operations).
pub fn retry_decision(
    error: &LocalError,
    attempt: usize,
    intervals: &[Duration],
) -> RetryDecision {
    if !error.is_retryable_kind() {
        return RetryDecision::GiveUp;
    }
    match intervals.get(attempt) {
        Some(&delay) => RetryDecision::RetryAfter(delay),
        None => RetryDecision::GiveUp,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_the_schedule() {
        let intervals = default_retry_intervals();
        let err = LocalError::ConnectionLost("reset".into());
        assert_eq!(
            retry_decision(&err, 0, &intervals),
            RetryDecision::RetryAfter(Duration::from_millis(0))
        );
        assert_eq!(
            retry_decision(&err, intervals.len(), &intervals),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn never_retries_a_non_retryable_kind() {
        let err = LocalError::ObjectNotExist {
            identity: "widget".into(),
        };
        let intervals = default_retry_intervals();
        assert_eq!(retry_decision(&err, 0, &intervals), RetryDecision::GiveUp);
    }
}
