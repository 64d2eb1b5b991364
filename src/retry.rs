//! Bounded retries with exponential backoff for idempotent upstream requests.
//!
//! The resolver wraps each outbound call in [`retry`]. The download queue
//! never does: a track download is attempted once per batch, and re-driving
//! failures is the caller's decision.
//!
//! Only errors that are [transient](crate::error::ErrorKind::is_transient)
//! are retried. Anything else, such as a missing track or a malformed
//! request, is returned after the first attempt. Running out of attempts
//! yields an [`Unavailable`](crate::error::ErrorKind::Unavailable) error
//! that carries the last failure.
//!
//! # Example
//!
//! ```rust
//! use tunefetch::retry::{retry, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let body = retry(&policy, "tracks", || async {
//!     client.execute(request.try_clone().unwrap()).await
//! })
//! .await?;
//! ```

use std::{future::Future, time::Duration};

use exponential_backoff::Backoff;

use crate::error::{Error, Result};

/// How often and how patiently to retry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,

    /// Base delay of the backoff schedule.
    pub initial_delay: Duration,

    /// Growth factor of the delay between consecutive attempts.
    pub factor: u32,

    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
    pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);
    pub const DEFAULT_FACTOR: u32 = 2;
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

    /// A policy that makes a single attempt and never sleeps.
    #[must_use]
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// The backoff schedule for this policy.
    ///
    /// Jitter is disabled so that the schedule is the plain doubling one.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        let mut backoff = Backoff::new(
            self.max_attempts.max(1),
            self.initial_delay,
            self.max_delay,
        );
        backoff.set_factor(self.factor.max(1));
        backoff.set_jitter(0.0);
        backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            initial_delay: Self::DEFAULT_INITIAL_DELAY,
            factor: Self::DEFAULT_FACTOR,
            max_delay: Self::DEFAULT_MAX_DELAY,
        }
    }
}

/// Runs `operation` until it succeeds, fails permanently, or the policy runs
/// out of attempts.
///
/// `what` names the operation in log messages and in the final error.
///
/// # Errors
///
/// * the first non-transient error `operation` returns
/// * `Unavailable` wrapping the last error once all attempts failed
pub async fn retry<F, Fut, T>(policy: &RetryPolicy, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let backoff = policy.backoff();
    let mut attempt = 0_u32;
    let mut last_error = None;

    for delay in &backoff {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{what}: succeeded on attempt {attempt}");
                }
                return Ok(result);
            }
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                match delay {
                    Some(delay) => {
                        warn!(
                            "{what}: attempt {attempt} failed: {e}; retrying in {:.1}s",
                            delay.as_secs_f32()
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => warn!("{what}: attempt {attempt} failed: {e}"),
                }
                last_error = Some(e);
            }
        }
    }

    let cause = last_error.map_or_else(|| String::from("no attempts made"), |e| e.to_string());
    Err(Error::unavailable(format!(
        "{what}: giving up after {attempt} attempts: {cause}"
    )))
}
