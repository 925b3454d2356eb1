//! Poll-Until Primitive
//!
//! Generic bounded condition wait: re-run a probe at a fixed interval until
//! the observed state satisfies a predicate or the timeout elapses. Every
//! "wait for X" in the orchestrator goes through [`wait_until`].

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Interval and deadline for a condition wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Result of a condition wait
#[derive(Debug, Clone)]
pub struct WaitOutcome<S> {
    /// Last observed state, satisfied or not
    pub state: S,
    pub satisfied: bool,
    pub elapsed: Duration,
    pub attempts: u32,
}

/// Wait until `is_satisfied` holds for a freshly probed state.
///
/// The probe runs immediately, then every `interval`, with one final probe
/// at the deadline. Probe errors propagate; an unsatisfied wait is not an
/// error and returns the last observed state.
pub async fn wait_until<S, P, Fut, C>(
    mut probe: P,
    is_satisfied: C,
    policy: PollPolicy,
) -> Result<WaitOutcome<S>>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<S>>,
    C: Fn(&S) -> bool,
{
    let start = Instant::now();
    let deadline = start + policy.timeout;
    let mut attempts = 0;

    loop {
        let state = probe().await?;
        attempts += 1;

        if is_satisfied(&state) {
            return Ok(WaitOutcome {
                state,
                satisfied: true,
                elapsed: start.elapsed(),
                attempts,
            });
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(WaitOutcome {
                state,
                satisfied: false,
                elapsed: start.elapsed(),
                attempts,
            });
        }

        tokio::time::sleep_until((now + policy.interval).min(deadline)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_satisfied_after_a_few_polls() {
        let counter = AtomicU32::new(0);
        let outcome = wait_until(
            || async { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) },
            |n| *n >= 3,
            PollPolicy::new(Duration::from_secs(1), Duration::from_secs(60)),
        )
        .await
        .unwrap();

        assert!(outcome.satisfied);
        assert_eq!(outcome.state, 3);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.elapsed, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_last_state() {
        let counter = AtomicU32::new(0);
        let outcome = wait_until(
            || async { Ok(counter.fetch_add(1, Ordering::SeqCst)) },
            |_| false,
            PollPolicy::new(Duration::from_secs(4), Duration::from_secs(10)),
        )
        .await
        .unwrap();

        assert!(!outcome.satisfied);
        // Probes at 0s, 4s, 8s and the deadline
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.state, 3);
        assert_eq!(outcome.elapsed, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_propagates() {
        let result: Result<WaitOutcome<()>> = wait_until(
            || async { Err(Error::Connection("reset".into())) },
            |_| true,
            PollPolicy::new(Duration::from_secs(1), Duration::from_secs(5)),
        )
        .await;

        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_satisfied_does_not_sleep() {
        let outcome = wait_until(
            || async { Ok("maintenance") },
            |s| *s == "maintenance",
            PollPolicy::new(Duration::from_secs(5), Duration::from_secs(5)),
        )
        .await
        .unwrap();

        assert!(outcome.satisfied);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.elapsed, Duration::ZERO);
    }
}
