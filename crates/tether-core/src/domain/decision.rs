//! Decision model: what happens to a record after an attempt.
//!
//! The decider is a pure function of (failures so far, attempt result); the
//! worker applies the decision to the record and persists it.

use std::time::Duration;

use rand::Rng;

use super::errors::ExecError;
use super::retry::RetryPolicy;

/// The next action to take for a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The attempt succeeded; remove the record.
    Complete,

    /// Retry the task after a delay.
    Retry { delay: Duration, reason: String },

    /// Give up: the record stays Failed but is no longer scheduled.
    MarkDead { reason: String },
}

/// Attempt-based retry logic with exponential backoff:
/// - Retry while failures < max_attempts
/// - Mark dead once failures >= max_attempts
/// - Use RetryPolicy for delay calculation
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    /// # Arguments
    /// * `prior_failures` - failed attempts recorded before this one
    /// * `result` - the result of the attempt that just finished
    pub fn decide(&self, prior_failures: u32, result: &Result<(), ExecError>) -> Decision {
        self.decide_with(prior_failures, result, &mut rand::thread_rng())
    }

    pub fn decide_with<R: Rng + ?Sized>(
        &self,
        prior_failures: u32,
        result: &Result<(), ExecError>,
        rng: &mut R,
    ) -> Decision {
        let err = match result {
            Ok(()) => return Decision::Complete,
            Err(err) => err,
        };

        let failures = prior_failures.saturating_add(1);
        if self.retry_policy.is_exhausted(failures) {
            let max = self.retry_policy.max_attempts.unwrap_or(failures);
            return Decision::MarkDead {
                reason: format!("max attempts reached: {failures}/{max}: {err}"),
            };
        }

        let delay = self.retry_policy.jittered_delay(failures, rng);
        Decision::Retry {
            delay,
            reason: format!("attempt {failures} failed, retry after {delay:?}: {err}"),
        }
    }
}
