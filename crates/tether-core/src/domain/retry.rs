//! Retry policy: decides backoff delays and the attempt ceiling.

use std::time::Duration;

use rand::Rng;

/// Retry policy for failed tasks.
///
/// Exponential backoff capped at `max_delay`, with jitter that only ever
/// shortens the delay so the cap is never exceeded.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for a single delay.
    pub max_delay: Duration,

    /// Fraction of the delay that may be shaved off at random, in `[0, 1)`.
    pub jitter: f64,

    /// Attempts after which a task is dead. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5 * 60),
            jitter: 0.2,
            max_attempts: Some(10),
        }
    }
}

impl RetryPolicy {
    /// Deterministic part of the delay after `attempts` failures (1-indexed).
    ///
    /// `delay = min(max_delay, base_delay * multiplier^(attempts - 1))`
    ///
    /// Example with base_delay=2s, multiplier=2.0:
    /// - attempt 1 (first failure): 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();
        if !delay_secs.is_finite() || delay_secs >= max_secs {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }

    /// `next_delay` with jitter applied.
    pub fn jittered_delay<R: Rng + ?Sized>(&self, attempts: u32, rng: &mut R) -> Duration {
        let delay = self.next_delay(attempts);
        if self.jitter <= 0.0 {
            return delay;
        }
        let shave: f64 = rng.gen_range(0.0..1.0) * self.jitter;
        delay.mul_f64(1.0 - shave)
    }

    /// Has a task with `attempts` failures exhausted the policy?
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempts >= max)
    }
}
