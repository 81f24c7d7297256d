//! Retry and polling primitives.
//!
//! - [`ExponentialBackoff`] + [`retry_with_backoff`] retry an operation that
//!   classifies its own failures as transient or permanent, bounded by a
//!   maximum elapsed time.
//! - [`LinearBackoff`] + [`poll_until`] poll for a result at increasing
//!   intervals until it is ready or a deadline passes.
//!
//! Both only suspend between attempts, never in the middle of one.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Exponential backoff policy with a cap on total elapsed time.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Give up once this much time has passed since the first attempt.
    pub max_elapsed: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(30 * 60),
        }
    }
}

impl ExponentialBackoff {
    /// Calculate the delay for a given attempt number (0-indexed).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }
}

/// Failure classification returned by a retried operation.
#[derive(Debug)]
pub enum Retry<E> {
    /// Worth trying again after a delay.
    Transient(E),
    /// Retrying cannot help; stop immediately.
    Permanent(E),
}

/// Run `op` until it succeeds, fails permanently, or the policy's
/// `max_elapsed` budget would be exceeded by the next delay.
///
/// Returns the last error when giving up.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &ExponentialBackoff,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Retry<E>>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(Retry::Permanent(e)) => return Err(e),
            Err(Retry::Transient(e)) => {
                let delay = policy.delay_for_attempt(attempt);
                if started.elapsed() + delay > policy.max_elapsed {
                    debug!(attempt, "Retry budget exhausted");
                    return Err(e);
                }
                debug!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

/// Linearly increasing poll interval with a ceiling.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    /// Interval before the first check.
    pub initial: Duration,
    /// Amount added to the interval after each check.
    pub step: Duration,
    /// Interval ceiling.
    pub max: Duration,
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            step: Duration::from_secs(1),
            max: Duration::from_secs(5),
        }
    }
}

impl LinearBackoff {
    /// Interval to wait before check number `attempt` (0-indexed).
    pub fn interval_for_attempt(&self, attempt: u32) -> Duration {
        self.initial
            .saturating_add(self.step.saturating_mul(attempt))
            .min(self.max)
    }
}

/// Result of a single poll check.
#[derive(Debug)]
pub enum Poll<T> {
    /// The awaited condition holds.
    Ready(T),
    /// Not yet; carries the latest observed value.
    Pending(T),
}

/// Final outcome of [`poll_until`].
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// A check reported [`Poll::Ready`] before the deadline.
    Ready(T),
    /// The deadline passed; carries the last pending value, if any check ran.
    DeadlineExceeded(Option<T>),
}

/// Poll `check` until it reports ready or `deadline` passes.
///
/// Waits one interval before each check. Dropping the returned future
/// cancels the wait at the current sleep.
pub async fn poll_until<T, E, F, Fut>(
    backoff: &LinearBackoff,
    deadline: Instant,
    mut check: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T>, E>>,
{
    let mut attempt: u32 = 0;
    let mut last = None;

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(PollOutcome::DeadlineExceeded(last));
        }

        let wait = backoff.interval_for_attempt(attempt).min(deadline - now);
        tokio::time::sleep(wait).await;
        if Instant::now() >= deadline {
            return Ok(PollOutcome::DeadlineExceeded(last));
        }

        match check().await? {
            Poll::Ready(value) => return Ok(PollOutcome::Ready(value)),
            Poll::Pending(value) => last = Some(value),
        }
        attempt = attempt.saturating_add(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn exponential_backoff_delays() {
        let policy = ExponentialBackoff::default();

        // 1s, 2s, 4s, 8s, 16s, 32s, 60s (capped), 60s
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(32));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_secs(60));
    }

    #[test]
    fn linear_backoff_caps_at_max() {
        let backoff = LinearBackoff::default();
        let secs: Vec<u64> = (0..7)
            .map(|a| backoff.interval_for_attempt(a).as_secs())
            .collect();
        assert_eq!(secs, vec![1, 2, 3, 4, 5, 5, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_on_permanent_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<(), &str> = retry_with_backoff(&ExponentialBackoff::default(), || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Retry::Permanent("boom"))
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<u32, &str> = retry_with_backoff(&ExponentialBackoff::default(), || {
            let c = Arc::clone(&c);
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Retry::Transient("busy"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_max_elapsed() {
        let policy = ExponentialBackoff {
            max_elapsed: Duration::from_secs(10),
            ..Default::default()
        };
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let started = Instant::now();
        let result: Result<(), &str> = retry_with_backoff(&policy, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Retry::Transient("busy"))
            }
        })
        .await;

        assert!(result.is_err());
        // Delays 1 + 2 + 4 = 7s fit; the next 8s delay would exceed 10s.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(started.elapsed() <= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_returns_ready_value() {
        let started = Instant::now();
        let ready_at = started + Duration::from_secs(2);
        let outcome: PollOutcome<u32> = poll_until(
            &LinearBackoff::default(),
            started + Duration::from_secs(5),
            || async move {
                if Instant::now() >= ready_at {
                    Ok::<_, ()>(Poll::Ready(0))
                } else {
                    Ok(Poll::Pending(1))
                }
            },
        )
        .await
        .unwrap();

        assert!(matches!(outcome, PollOutcome::Ready(0)));
        // Checks at 1s and 3s.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_deadline_returns_last_pending_value() {
        let started = Instant::now();
        let outcome: PollOutcome<u32> = poll_until(
            &LinearBackoff::default(),
            started + Duration::from_millis(2500),
            || async { Ok::<_, ()>(Poll::Pending(7)) },
        )
        .await
        .unwrap();

        match outcome {
            PollOutcome::DeadlineExceeded(last) => assert_eq!(last, Some(7)),
            PollOutcome::Ready(_) => panic!("expected deadline"),
        }
        assert_eq!(started.elapsed(), Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_propagates_check_errors() {
        let result: Result<PollOutcome<()>, &str> = poll_until(
            &LinearBackoff::default(),
            Instant::now() + Duration::from_secs(5),
            || async { Err("db down") },
        )
        .await;
        assert_eq!(result.unwrap_err(), "db down");
    }
}
