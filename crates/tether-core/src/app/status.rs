//! Status views for operators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::record::TaskRecord;
use crate::domain::retry::RetryPolicy;
use crate::domain::task::Task;

/// Counts of outstanding work.
///
/// - pending: waiting for a first attempt
/// - failed: failed at least once, still scheduled
/// - dead: past the attempt ceiling, kept for inspection
/// - in_flight: attempts running right now
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    pub pending: usize,
    pub failed: usize,
    pub dead: usize,
    pub in_flight: usize,
    pub dead_tasks: Vec<DeadTask>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadTask {
    pub key: String,
    pub kind: String,
    pub description: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl StatusView {
    pub fn from_snapshots<T: Task>(
        pending: &[TaskRecord<T>],
        failed: &[TaskRecord<T>],
        policy: &RetryPolicy,
        in_flight: usize,
    ) -> Self {
        let dead_tasks: Vec<DeadTask> = failed
            .iter()
            .filter(|r| r.is_dead(policy))
            .map(|r| DeadTask {
                key: r.key().to_string(),
                kind: r.task.kind().to_string(),
                description: r.task.describe(),
                attempts: r.attempt_count,
                last_error: r.last_error.clone(),
                last_attempt_at: r.last_attempt_at,
            })
            .collect();

        Self {
            pending: pending.len(),
            failed: failed.len() - dead_tasks.len(),
            dead: dead_tasks.len(),
            in_flight,
            dead_tasks,
        }
    }

    pub fn outstanding(&self) -> usize {
        self.pending + self.failed + self.dead
    }
}
