//! Bounded retry loop with exponential backoff, a per-attempt timeout and an
//! overall deadline. Cancellation stops scheduling further attempts; an attempt
//! already in flight is allowed to finish or time out.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

/// Errors the retry loop can reason about.
pub trait Transient: Sized {
    /// Whether another attempt may succeed.
    fn is_transient(&self) -> bool;
    /// Error representing an attempt that exceeded its timeout.
    fn timed_out(after: Duration) -> Self;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub attempt_timeout_ms: u64,
    /// Total wall-clock budget for all attempts; 0 disables the deadline.
    pub deadline_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            attempt_timeout_ms: 20_000,
            deadline_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// No sleeping between attempts; handy for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            attempt_timeout_ms: 5_000,
            deadline_ms: 0,
        }
    }

    /// Delay before attempt `attempt + 1` (1-based `attempt`).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}

/// Final error plus the number of attempts made.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

/// Cooperative cancellation flag fed by the scheduler's shutdown signal.
#[derive(Debug, Clone)]
pub struct Cancel(Option<watch::Receiver<bool>>);

impl Cancel {
    pub fn never() -> Self {
        Cancel(None)
    }

    pub fn from_watch(rx: watch::Receiver<bool>) -> Self {
        Cancel(Some(rx))
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }
}

/// Run `op` until it succeeds, returns a non-transient error, runs out of
/// attempts, hits the deadline, or `cancel` fires.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &Cancel,
    mut op: F,
) -> Result<T, Exhausted<E>>
where
    E: Transient,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let attempt_timeout = Duration::from_millis(policy.attempt_timeout_ms.max(1));
    let deadline = (policy.deadline_ms > 0)
        .then(|| Instant::now() + Duration::from_millis(policy.deadline_ms));

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(attempt_timeout, op(attempt)).await {
            Ok(r) => r,
            Err(_) => Err(E::timed_out(attempt_timeout)),
        };

        let err = match result {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        if !err.is_transient() || attempt >= max_attempts || cancel.is_cancelled() {
            return Err(Exhausted { attempts: attempt, last: err });
        }

        let delay = policy.backoff(attempt);
        if let Some(dl) = deadline {
            if Instant::now() + delay >= dl {
                return Err(Exhausted { attempts: attempt, last: err });
            }
        }
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum E {
        Flaky,
        Fatal,
        Timeout,
    }

    impl Transient for E {
        fn is_transient(&self) -> bool {
            !matches!(self, E::Fatal)
        }
        fn timed_out(_after: Duration) -> Self {
            E::Timeout
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            base_delay_ms: 500,
            max_delay_ms: 1_500,
            ..RetryPolicy::default()
        };
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_millis(1_000));
        assert_eq!(p.backoff(3), Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = with_retry(&RetryPolicy::immediate(3), &Cancel::never(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(E::Flaky) }
        })
        .await;
        let err = res.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let res: Result<(), _> =
            with_retry(&RetryPolicy::immediate(5), &Cancel::never(), |_| async { Err(E::Fatal) }).await;
        let err = res.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(err.last, E::Fatal);
    }

    #[tokio::test]
    async fn succeeds_on_a_later_attempt() {
        let res = with_retry(&RetryPolicy::immediate(3), &Cancel::never(), |attempt| async move {
            if attempt < 2 {
                Err(E::Flaky)
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(res.unwrap(), 2);
    }

    #[tokio::test]
    async fn slow_attempts_time_out() {
        let policy = RetryPolicy {
            attempt_timeout_ms: 10,
            ..RetryPolicy::immediate(2)
        };
        let res: Result<(), Exhausted<E>> = with_retry(&policy, &Cancel::never(), |_| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        let err = res.unwrap_err();
        assert_eq!(err.last, E::Timeout);
        assert_eq!(err.attempts, 2);
    }

    #[tokio::test]
    async fn cancellation_stops_further_attempts() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let res: Result<(), Exhausted<E>> = with_retry(
            &RetryPolicy::immediate(5),
            &Cancel::from_watch(rx),
            |_| async { Err(E::Flaky) },
        )
        .await;
        assert_eq!(res.unwrap_err().attempts, 1);
    }
}
