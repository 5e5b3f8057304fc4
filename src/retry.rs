//! Bounded polling with an injectable clock
//!
//! Backends often need a moment before they can answer: a magnet is still resolving, a
//! freshly added task is not yet listed, progress has not moved. Those waits go through a
//! [`PollPolicy`] and a [`Sleeper`] so they are always bounded and tests never sleep for real.
//!
//! # Example
//!
//! ```no_run
//! use librarian_dl::config::PollPolicy;
//! use librarian_dl::retry::{Attempt, TokioSleeper, poll_until};
//! use librarian_dl::error::ClientError;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let policy = PollPolicy::fixed(5, Duration::from_secs(2));
//! let found = poll_until(&policy, &TokioSleeper, |attempt| async move {
//!     if attempt >= 3 {
//!         Ok::<_, ClientError>(Attempt::Done("abc123"))
//!     } else {
//!         Ok(Attempt::Again)
//!     }
//! })
//! .await;
//! assert!(found.is_ok());
//! # }
//! ```

use crate::config::PollPolicy;
use crate::error::ClientError;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection refused, an item not yet visible) return `true`.
/// Permanent failures (bad credentials, explicit rejection, malformed answers) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ClientError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Transport { .. }
                | ClientError::Timeout { .. }
                | ClientError::IdentifierNotFound { .. }
        )
    }
}

/// Source of delays between attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Result of one polling check
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    /// The awaited condition holds
    Done(T),
    /// Not there yet; try again after the policy delay
    Again,
}

/// Why a polling loop gave up
#[derive(Debug)]
pub enum PollError<E> {
    /// Every attempt came back [`Attempt::Again`] or with a retryable error
    Exhausted {
        /// Number of checks made
        attempts: u32,
        /// Last retryable error seen, if any
        last_error: Option<E>,
    },
    /// A check failed with a non-retryable error
    Aborted(E),
}

/// Call `check` repeatedly until it reports [`Attempt::Done`], at most `policy.max_attempts` times
///
/// `check` receives the 1-based attempt number. Retryable errors count as an attempt
/// and are remembered; a non-retryable error ends the loop immediately.
pub async fn poll_until<F, Fut, T, E>(
    policy: &PollPolicy,
    sleeper: &dyn Sleeper,
    mut check: F,
) -> std::result::Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<Attempt<T>, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.delay;
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match check(attempt).await {
            Ok(Attempt::Done(value)) => return Ok(value),
            Ok(Attempt::Again) => {}
            Err(e) if e.is_retryable() => {
                tracing::debug!(error = %e, attempt, max_attempts, "Poll attempt failed");
                last_error = Some(e);
            }
            Err(e) => return Err(PollError::Aborted(e)),
        }

        if attempt < max_attempts {
            sleeper.sleep(jittered(policy, delay)).await;
            delay = next_delay(policy, delay);
        }
    }

    Err(PollError::Exhausted {
        attempts: max_attempts,
        last_error,
    })
}

fn next_delay(policy: &PollPolicy, delay: Duration) -> Duration {
    let next = Duration::from_secs_f64(delay.as_secs_f64() * policy.backoff_multiplier);
    next.min(policy.max_delay.max(policy.delay))
}

fn jittered(policy: &PollPolicy, delay: Duration) -> Duration {
    if policy.jitter {
        add_jitter(delay)
    } else {
        delay
    }
}

/// Add random jitter to a delay
///
/// The actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

/// Sleeper that records requested delays and returns immediately
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSleeper {
    pub(crate) sleeps: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl RecordingSleeper {
    pub(crate) fn count(&self) -> usize {
        self.sleeps.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
    }
}
