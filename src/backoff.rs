//! Retry policy shared by every retrying call site
//!
//! A [`RetryPolicy`] couples an attempt ceiling with a [`Backoff`] strategy.
//! Delays are computed from the 1-based number of the attempt that just
//! failed, so a linear policy with a 3s base waits 3s after the first
//! failure, 6s after the second, and so on.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Delay growth between attempts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// `base * attempt`
    Linear { base: Duration },
    /// `min(max, base * 2^(attempt - 1))`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Linear { base } => base.saturating_mul(attempt),
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Errors that know whether another attempt could help
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Attempt ceiling plus backoff strategy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Upper bound of a random delay added to every backoff
    pub jitter: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(3, Duration::from_millis(3000))
    }
}

/// Final value of a retried operation together with how it got there
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
    pub waited: Duration,
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear { base },
            jitter: None,
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { base, max },
            jitter: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff.delay_for(attempt);
        match self.jitter {
            Some(jitter) if !jitter.is_zero() => {
                let millis = rand::thread_rng().gen_range(0..=jitter.as_millis() as u64);
                delay.saturating_add(Duration::from_millis(millis))
            }
            _ => delay,
        }
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the
    /// attempt ceiling is reached. `op` receives the 1-based attempt number.
    ///
    /// Attempts are strictly sequential; the delay only suspends this call.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> RetryOutcome<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut waited = Duration::ZERO;
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        waited,
                    }
                }
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    waited += delay;
                    attempt += 1;
                }
                Err(e) => {
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                        waited,
                    }
                }
            }
        }
    }
}
