//! Bounded retry harness for handshake phases.
//!
//! Wraps a unit of work with a fixed-delay retry loop. No jitter and no
//! exponential factor: the remote front door rate-limits on burst shape,
//! and the reference cadence is a flat delay per phase.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry budget for one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt. `None` retries forever.
    pub retries: Option<u32>,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: Option<u32>, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// Whether another attempt fits the budget after `attempt` failures.
    fn has_more(&self, attempt: u32) -> bool {
        self.retries.map_or(true, |r| attempt <= r)
    }
}

/// Successful resolution of a retried unit of work.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// The work succeeded.
    Done(T),
    /// The surrounding state was cancelled before the next attempt; the
    /// result is to be discarded and no further events were emitted.
    Ignored,
}

impl<T> RetryOutcome<T> {
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored)
    }
}

/// Terminal failure of a retried unit of work.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// Total attempts made, including the failing one.
    pub attempts: u32,
    /// The last error observed.
    pub error: E,
}

/// Drive `work` under `policy`.
///
/// `cancelled` is probed before every attempt; once it reports true the
/// harness resolves `Ignored` without emitting further failure events.
/// `fatal` errors short-circuit the budget. `on_failure` observes
/// `(attempt, has_more, error)` after each failed attempt.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    mut cancelled: impl FnMut() -> bool,
    mut fatal: impl FnMut(&E) -> bool,
    mut on_failure: impl FnMut(u32, bool, &E),
    mut work: F,
) -> Result<RetryOutcome<T>, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        if cancelled() {
            return Ok(RetryOutcome::Ignored);
        }

        attempt += 1;
        match work().await {
            Ok(value) => return Ok(RetryOutcome::Done(value)),
            Err(error) => {
                let has_more = policy.has_more(attempt) && !fatal(&error);
                on_failure(attempt, has_more, &error);
                if !has_more {
                    return Err(RetryExhausted { attempts: attempt, error });
                }
            }
        }

        sleep(policy.delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn immediate() -> RetryPolicy {
        RetryPolicy::new(Some(2), Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let result = run_with_retry(
            immediate(),
            || false,
            |_: &&str| false,
            |_, _, _| panic!("no failure expected"),
            || async { Ok::<_, &str>(7) },
        )
        .await
        .unwrap();
        assert_eq!(result, RetryOutcome::Done(7));
    }

    #[tokio::test]
    async fn test_succeeds_within_budget() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let result = run_with_retry(
            immediate(),
            || false,
            |_: &&str| false,
            |_, _, _| {},
            move || async move {
                if calls_ref.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(result, RetryOutcome::Done(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_total_attempts() {
        let mut observed = Vec::new();
        let err = run_with_retry(
            immediate(),
            || false,
            |_: &&str| false,
            |attempt, has_more, _| observed.push((attempt, has_more)),
            || async { Err::<(), _>("down") },
        )
        .await
        .unwrap_err();

        // retries=2 means three attempts in total
        assert_eq!(err.attempts, 3);
        assert_eq!(observed, vec![(1, true), (2, true), (3, false)]);
    }

    #[tokio::test]
    async fn test_fatal_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let err = run_with_retry(
            RetryPolicy::new(Some(10), Duration::from_millis(1)),
            || false,
            |e: &&str| *e == "fatal",
            |_, has_more, _| assert!(!has_more),
            move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("fatal")
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_resolves_ignored() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let result = run_with_retry(
            RetryPolicy::new(None, Duration::from_millis(1)),
            // Cancel before the second attempt.
            || calls_ref.load(Ordering::SeqCst) >= 1,
            |_: &&str| false,
            |_, _, _| {},
            move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("transient")
            },
        )
        .await
        .unwrap();
        assert!(result.is_ignored());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_infinite_budget_keeps_retrying() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let result = run_with_retry(
            RetryPolicy::new(None, Duration::from_millis(1)),
            || false,
            |_: &&str| false,
            |_, has_more, _| assert!(has_more),
            move || async move {
                if calls_ref.fetch_add(1, Ordering::SeqCst) < 5 {
                    Err("transient")
                } else {
                    Ok(())
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(result, RetryOutcome::Done(()));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }
}
