//! Bounded exponential backoff.
//!
//! One retry primitive is shared by every call site that talks to the cluster:
//! creating the manifest object, applying a resource and polling a readiness
//! check. Each site passes its own [`Backoff`] so step counts can differ.
//!
//! The condition closure decides the outcome of every attempt:
//!
//! - `Ok(Some(value))` - done, return the value
//! - `Ok(None)` - transient failure or not ready yet, try again
//! - `Err(e)` - fatal, stop immediately without further attempts
//!
//! # Example
//!
//! ```ignore
//! use kab::retry::{retry_with_backoff, Backoff};
//!
//! let pods = retry_with_backoff(&Backoff::default(), "list_pods", || async {
//!     match cluster.list_pods(None, "app=web").await {
//!         Ok(pods) => Ok(Some(pods)),
//!         Err(_) => Ok(None),
//!     }
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

/// Number of attempts for the standard backoff. Together with the delays below
/// the sleeps add up to about thirty seconds, plus the time spent in attempts.
pub const DEFAULT_STEPS: u32 = 18;

/// Delay before the second attempt.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Growth factor applied to the delay after every attempt.
pub const DEFAULT_FACTOR: f64 = 1.3;

/// Spread applied to backoffs that write to the cluster, so concurrent
/// installers do not retry in lockstep.
pub const DEFAULT_JITTER: f64 = 0.1;

/// Backoff policy for operations that may fail transiently.
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    /// Total number of attempts (0 means the condition never runs)
    pub steps: u32,
    /// Delay between the first and second attempt
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each attempt
    pub factor: f64,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Random spread applied to each delay, as a fraction (0.0 = none)
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            factor: DEFAULT_FACTOR,
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        }
    }
}

impl Backoff {
    /// Create a policy with the default delays and the given number of steps
    pub fn with_steps(steps: u32) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    /// Create a policy that never sleeps, for tests and dry runs
    pub fn immediate(steps: u32) -> Self {
        Self {
            steps,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    /// This policy with `jitter` spread applied to every delay
    pub fn with_jitter(self, jitter: f64) -> Self {
        Self { jitter, ..self }
    }

    /// The delay following `delay`, grown by the factor and capped
    fn next_delay(&self, delay: Duration) -> Duration {
        let grown = delay.as_secs_f64() * self.factor;
        Duration::from_secs_f64(grown.min(self.max_delay.as_secs_f64()))
    }

    /// `delay` with jitter applied
    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = rand::thread_rng().gen_range(0.0..self.jitter);
        Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + spread))
    }
}

/// Why a backoff loop stopped without producing a value
#[derive(Debug, Error, PartialEq)]
pub enum BackoffError<E> {
    /// The condition reported a fatal error
    #[error("{0}")]
    Aborted(E),
    /// Every attempt was transient
    #[error("timed out waiting for the condition after {attempts} attempts")]
    Exhausted {
        /// Number of attempts made
        attempts: u32,
    },
}

/// Run `condition` until it yields a value, fails fatally, or the policy runs
/// out of steps.
///
/// Exactly `backoff.steps` attempts are made when every attempt is transient.
/// The loop sleeps between attempts but never after the last one.
pub async fn retry_with_backoff<F, Fut, T, E>(
    backoff: &Backoff,
    operation_name: &str,
    mut condition: F,
) -> Result<T, BackoffError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let mut delay = backoff.initial_delay;

    for attempt in 1..=backoff.steps {
        match condition().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => {
                debug!(operation = %operation_name, attempt, "Operation aborted");
                return Err(BackoffError::Aborted(e));
            }
        }

        if attempt == backoff.steps {
            break;
        }

        let sleep_for = backoff.jittered(delay);
        debug!(
            operation = %operation_name,
            attempt,
            delay_ms = sleep_for.as_millis() as u64,
            "Condition not met, retrying"
        );
        tokio::time::sleep(sleep_for).await;
        delay = backoff.next_delay(delay);
    }

    warn!(
        operation = %operation_name,
        attempts = backoff.steps,
        "Operation did not succeed within the retry budget"
    );
    Err(BackoffError::Exhausted {
        attempts: backoff.steps,
    })
}
