//! Store port - the durable source of truth for outstanding tasks.
//!
//! # Contract
//! - A key lives in exactly one of {Pending, Failed} while outstanding and in
//!   neither after `mark_done`.
//! - `get_pending` / `get_failed` return owned copy-on-read snapshots: later
//!   writes never show through a snapshot already returned.
//! - Each call is atomic per key. Calls are synchronous and expected to be
//!   fast; workers invoke them directly.
//! - After `close`, every call returns `StoreError::Closed`.
//! - The Manager rebuilds all scheduling state from these calls on start.

use crate::domain::errors::StoreError;
use crate::domain::record::TaskRecord;
use crate::domain::task::Task;
use crate::ports::Clock;

pub trait Store<T: Task>: Send + Sync {
    /// Snapshot of all Failed records, dead ones included.
    fn get_failed(&self) -> Result<Vec<TaskRecord<T>>, StoreError>;

    /// Snapshot of all Pending records.
    fn get_pending(&self) -> Result<Vec<TaskRecord<T>>, StoreError>;

    /// Upsert as Pending.
    ///
    /// Re-marking a Pending key keeps its `created_at` and replaces the
    /// payload. Marking a Failed key moves it back to Pending with its attempt
    /// metadata reset.
    fn mark_pending(&self, record: &TaskRecord<T>) -> Result<(), StoreError>;

    /// Upsert as Failed, overwriting any prior record for the key.
    fn mark_failed(&self, record: &TaskRecord<T>) -> Result<(), StoreError>;

    /// Remove the record for the key. Succeeds if it is already gone.
    fn mark_done(&self, record: &TaskRecord<T>) -> Result<(), StoreError>;

    fn close(&self) -> Result<(), StoreError>;
}

/// Producer entry point: persist `task` as Pending. Fire-and-forget once this
/// returns `Ok`.
pub fn submit<T: Task>(
    store: &dyn Store<T>,
    task: T,
    clock: &dyn Clock,
) -> Result<TaskRecord<T>, StoreError> {
    let record = TaskRecord::pending(task, clock.now());
    store.mark_pending(&record)?;
    tracing::debug!(key = %record.key(), kind = record.task.kind(), "task submitted");
    Ok(record)
}
