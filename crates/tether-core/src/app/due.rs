//! Due-set computation over one pair of Store snapshots.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::domain::errors::ManagerError;
use crate::domain::record::TaskRecord;
use crate::domain::retry::RetryPolicy;
use crate::domain::task::{Task, TaskKey};

/// Result of planning one scan.
#[derive(Debug)]
pub struct ScanPlan<T> {
    /// Records to dispatch, oldest `due_at` first.
    pub due: Vec<TaskRecord<T>>,
    pub pending: usize,
    /// Failed records still scheduled (dead ones excluded).
    pub failed: usize,
    pub dead: usize,
    /// Earliest `next_eligible_at` strictly after `now`.
    pub next_wakeup: Option<DateTime<Utc>>,
}

/// `pending ∪ {failed that are live and due}`, merged by `due_at`.
///
/// A key present in both snapshots violates the Store contract and is
/// reported instead of being dispatched twice.
pub fn plan<T: Task>(
    pending: Vec<TaskRecord<T>>,
    failed: Vec<TaskRecord<T>>,
    now: DateTime<Utc>,
    policy: &RetryPolicy,
) -> Result<ScanPlan<T>, ManagerError> {
    let pending_keys: HashSet<TaskKey> = pending.iter().map(TaskRecord::key).collect();
    if let Some(dup) = failed.iter().find(|r| pending_keys.contains(&r.key())) {
        return Err(ManagerError::InvariantViolation(format!(
            "key {} is both pending and failed",
            dup.key()
        )));
    }

    let pending_count = pending.len();
    let mut failed_count = 0;
    let mut dead_count = 0;
    let mut next_wakeup: Option<DateTime<Utc>> = None;
    let mut due = pending;

    for record in failed {
        if record.is_dead(policy) {
            dead_count += 1;
            continue;
        }
        failed_count += 1;
        if record.is_due(now, policy) {
            due.push(record);
        } else if let Some(at) = record.next_eligible_at {
            next_wakeup = Some(next_wakeup.map_or(at, |w| w.min(at)));
        }
    }

    due.sort_by(|a, b| a.due_at().cmp(&b.due_at()).then_with(|| a.key().cmp(&b.key())));

    Ok(ScanPlan {
        due,
        pending: pending_count,
        failed: failed_count,
        dead: dead_count,
        next_wakeup,
    })
}
