//! Attempt identifiers.

use std::fmt;

use chrono::{DateTime, Utc};
use ulid::Ulid;

/// Identifies one execution try of a task.
///
/// Never persisted: it correlates the log lines of an attempt and names the
/// temp files an executor writes, so two attempts of the same key never
/// collide. ULID ordering follows the attempt's start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(Ulid);

impl AttemptId {
    pub fn generate(started_at: DateTime<Utc>) -> Self {
        let ms = started_at.timestamp_millis().max(0) as u64;
        Self(Ulid::from_parts(ms, rand::random()))
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt-{}", self.0)
    }
}
