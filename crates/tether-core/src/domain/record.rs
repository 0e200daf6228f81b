//! Task record: payload + retry metadata.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::retry::RetryPolicy;
use super::task::{Task, TaskKey};

/// Status partition a record lives in.
///
/// State transitions:
/// - Pending -> Done (removed)
/// - Pending -> Failed -> Failed ... -> Done (removed)
/// - Failed -> Pending (operator re-drive via `mark_pending`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Failed,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Failed => "failed",
            TaskStatus::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the Store persists for one task.
///
/// Design:
/// - The Store owns the authoritative copy; workers mutate a clone and write
///   it back through `mark_failed` / `mark_done`.
/// - `next_eligible_at` is persisted so backoff survives restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord<T> {
    pub task: T,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,

    /// Number of failed attempts so far.
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Earliest time a Failed record may run again. `None` on a Failed record
    /// means it is dead and will not be scheduled.
    pub next_eligible_at: Option<DateTime<Utc>>,
}

impl<T: Task> TaskRecord<T> {
    /// Fresh record for a producer to hand to `Store::mark_pending`.
    pub fn pending(task: T, now: DateTime<Utc>) -> Self {
        Self {
            task,
            status: TaskStatus::Pending,
            created_at: now,
            attempt_count: 0,
            last_error: None,
            last_attempt_at: None,
            next_eligible_at: None,
        }
    }

    pub fn key(&self) -> TaskKey {
        self.task.key()
    }

    /// Apply one failed attempt.
    ///
    /// `next_eligible_at` never moves backwards. Once the policy is exhausted
    /// the record is dead and `next_eligible_at` is cleared.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
        next_eligible_at: DateTime<Utc>,
        policy: &RetryPolicy,
    ) {
        self.status = TaskStatus::Failed;
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_error = Some(error.into());
        self.last_attempt_at = Some(now);
        self.next_eligible_at = if policy.is_exhausted(self.attempt_count) {
            None
        } else {
            Some(match self.next_eligible_at {
                Some(prev) if prev > next_eligible_at => prev,
                _ => next_eligible_at,
            })
        };
    }

    pub fn is_dead(&self, policy: &RetryPolicy) -> bool {
        self.status == TaskStatus::Failed
            && (self.next_eligible_at.is_none() || policy.is_exhausted(self.attempt_count))
    }

    /// Is this record eligible to run at `now`?
    pub fn is_due(&self, now: DateTime<Utc>, policy: &RetryPolicy) -> bool {
        match self.status {
            TaskStatus::Pending => true,
            TaskStatus::Failed => {
                !self.is_dead(policy) && self.next_eligible_at.is_some_and(|at| now >= at)
            }
            TaskStatus::Done => false,
        }
    }

    /// Timestamp the due set is ordered by.
    pub fn due_at(&self) -> DateTime<Utc> {
        match self.status {
            TaskStatus::Failed => self.next_eligible_at.unwrap_or(self.created_at),
            _ => self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::kinds::WritebackTask;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn record() -> TaskRecord<WritebackTask> {
        TaskRecord::pending(WritebackTask::new("library", "sha256:aa"), t0())
    }

    #[test]
    fn pending_record_is_due_immediately() {
        let r = record();
        assert_eq!(r.status, TaskStatus::Pending);
        assert!(r.is_due(t0(), &RetryPolicy::default()));
        assert_eq!(r.due_at(), t0());
    }

    #[test]
    fn failure_schedules_retry() {
        let policy = RetryPolicy::default();
        let mut r = record();
        let next = t0() + ChronoDuration::seconds(2);
        r.record_failure("boom", t0(), next, &policy);

        assert_eq!(r.status, TaskStatus::Failed);
        assert_eq!(r.attempt_count, 1);
        assert_eq!(r.last_error.as_deref(), Some("boom"));
        assert_eq!(r.last_attempt_at, Some(t0()));
        assert_eq!(r.next_eligible_at, Some(next));
        assert!(!r.is_due(t0(), &policy));
        assert!(r.is_due(next, &policy));
    }

    #[test]
    fn next_eligible_never_moves_backwards() {
        let policy = RetryPolicy::default();
        let mut r = record();
        let later = t0() + ChronoDuration::seconds(60);
        r.record_failure("first", t0(), later, &policy);
        r.record_failure("second", t0(), t0() + ChronoDuration::seconds(5), &policy);
        assert_eq!(r.next_eligible_at, Some(later));
    }

    #[test]
    fn exhausted_record_is_dead_and_never_due() {
        let policy = RetryPolicy {
            max_attempts: Some(2),
            ..RetryPolicy::default()
        };
        let mut r = record();
        r.record_failure("e1", t0(), t0(), &policy);
        assert!(!r.is_dead(&policy));
        r.record_failure("e2", t0(), t0(), &policy);
        assert!(r.is_dead(&policy));
        assert_eq!(r.next_eligible_at, None);
        assert!(!r.is_due(t0() + ChronoDuration::days(365), &policy));
    }
}
