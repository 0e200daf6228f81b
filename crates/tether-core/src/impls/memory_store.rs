//! InMemoryStore - non-durable Store for tests and embedding.
//!
//! # Implementation
//! - HashMap<TaskKey, TaskRecord<T>> behind a std Mutex (no await while held)
//! - `set_unavailable(true)` makes every call fail with
//!   `StoreError::Unavailable`, to exercise persistence-failure paths

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::domain::errors::StoreError;
use crate::domain::record::{TaskRecord, TaskStatus};
use crate::domain::task::{Task, TaskKey};
use crate::ports::Store;

struct State<T> {
    records: HashMap<TaskKey, TaskRecord<T>>,
    closed: bool,
}

pub struct InMemoryStore<T> {
    state: Mutex<State<T>>,
    unavailable: AtomicBool,
}

impl<T: Task> InMemoryStore<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                records: HashMap::new(),
                closed: false,
            }),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate a backend outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Total outstanding records (Pending + Failed). Still readable after
    /// `close`, for assertions.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, State<T>>, StoreError> {
        let guard = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        if guard.closed {
            return Err(StoreError::Closed);
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".into()));
        }
        Ok(guard)
    }

    fn snapshot(&self, status: TaskStatus) -> Result<Vec<TaskRecord<T>>, StoreError> {
        let state = self.lock()?;
        let mut out: Vec<TaskRecord<T>> = state
            .records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.due_at().cmp(&b.due_at()).then_with(|| a.key().cmp(&b.key())));
        Ok(out)
    }
}

impl<T: Task> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Task> Store<T> for InMemoryStore<T> {
    fn get_failed(&self) -> Result<Vec<TaskRecord<T>>, StoreError> {
        self.snapshot(TaskStatus::Failed)
    }

    fn get_pending(&self) -> Result<Vec<TaskRecord<T>>, StoreError> {
        self.snapshot(TaskStatus::Pending)
    }

    fn mark_pending(&self, record: &TaskRecord<T>) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let key = record.key();
        let mut next = record.clone();
        next.status = TaskStatus::Pending;
        next.next_eligible_at = None;
        match state.records.get(&key) {
            Some(existing) if existing.status == TaskStatus::Pending => {
                next.created_at = existing.created_at;
                next.attempt_count = existing.attempt_count;
                next.last_error = existing.last_error.clone();
                next.last_attempt_at = existing.last_attempt_at;
            }
            Some(existing) => {
                next.created_at = existing.created_at;
                next.attempt_count = 0;
                next.last_error = None;
                next.last_attempt_at = None;
            }
            None => {}
        }
        state.records.insert(key, next);
        Ok(())
    }

    fn mark_failed(&self, record: &TaskRecord<T>) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let mut next = record.clone();
        next.status = TaskStatus::Failed;
        state.records.insert(record.key(), next);
        Ok(())
    }

    fn mark_done(&self, record: &TaskRecord<T>) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.records.remove(&record.key());
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        if state.closed {
            return Err(StoreError::Closed);
        }
        state.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::kinds::WritebackTask;
    use crate::domain::retry::RetryPolicy;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn pending(digest: &str, at: DateTime<Utc>) -> TaskRecord<WritebackTask> {
        TaskRecord::pending(WritebackTask::new("library", digest), at)
    }

    #[test]
    fn mark_pending_twice_does_not_duplicate() {
        let store = InMemoryStore::new();
        store.mark_pending(&pending("sha256:aa", t0())).unwrap();
        store
            .mark_pending(&pending("sha256:aa", t0() + ChronoDuration::seconds(5)))
            .unwrap();

        let snapshot = store.get_pending().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].created_at, t0());
    }

    #[test]
    fn key_lives_in_exactly_one_partition() {
        let store = InMemoryStore::new();
        let mut r = pending("sha256:aa", t0());
        store.mark_pending(&r).unwrap();

        r.record_failure("boom", t0(), t0(), &RetryPolicy::default());
        store.mark_failed(&r).unwrap();

        assert!(store.get_pending().unwrap().is_empty());
        assert_eq!(store.get_failed().unwrap().len(), 1);
    }

    #[test]
    fn re_driving_a_failed_key_resets_attempts() {
        let store = InMemoryStore::new();
        let mut r = pending("sha256:aa", t0());
        r.record_failure("boom", t0(), t0(), &RetryPolicy::default());
        store.mark_failed(&r).unwrap();

        store.mark_pending(&pending("sha256:aa", t0())).unwrap();
        let snapshot = store.get_pending().unwrap();
        assert_eq!(snapshot[0].attempt_count, 0);
        assert_eq!(snapshot[0].last_error, None);
        assert!(store.get_failed().unwrap().is_empty());
    }

    #[test]
    fn mark_done_removes_and_is_idempotent() {
        let store = InMemoryStore::new();
        let r = pending("sha256:aa", t0());
        store.mark_pending(&r).unwrap();

        store.mark_done(&r).unwrap();
        store.mark_done(&r).unwrap();
        assert!(store.get_pending().unwrap().is_empty());
        assert!(store.get_failed().unwrap().is_empty());
    }

    #[test]
    fn snapshot_is_not_affected_by_later_writes() {
        let store = InMemoryStore::new();
        let r = pending("sha256:aa", t0());
        store.mark_pending(&r).unwrap();

        let snapshot = store.get_pending().unwrap();
        store.mark_done(&r).unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn pending_snapshot_is_fifo() {
        let store = InMemoryStore::new();
        store
            .mark_pending(&pending("sha256:bb", t0() + ChronoDuration::seconds(1)))
            .unwrap();
        store.mark_pending(&pending("sha256:aa", t0())).unwrap();

        let digests: Vec<String> = store
            .get_pending()
            .unwrap()
            .into_iter()
            .map(|r| r.task.digest)
            .collect();
        assert_eq!(digests, vec!["sha256:aa", "sha256:bb"]);
    }

    #[test]
    fn closed_store_rejects_everything() {
        let store = InMemoryStore::<WritebackTask>::new();
        store.close().unwrap();

        assert!(matches!(store.get_pending(), Err(StoreError::Closed)));
        assert!(matches!(
            store.mark_pending(&pending("sha256:aa", t0())),
            Err(StoreError::Closed)
        ));
        assert!(matches!(store.close(), Err(StoreError::Closed)));
    }

    #[test]
    fn unavailable_store_reports_persistence_error() {
        let store = InMemoryStore::<WritebackTask>::new();
        store.set_unavailable(true);
        let err = store.mark_pending(&pending("sha256:aa", t0())).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set_unavailable(false);
        store.mark_pending(&pending("sha256:aa", t0())).unwrap();
        assert_eq!(store.len(), 1);
    }
}
