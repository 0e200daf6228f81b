//! In-flight key set: at most one running attempt per task key.
//!
//! `try_acquire` hands out a `KeyGuard`; dropping the guard (normal return or
//! unwinding) releases the key. Keys released after `begin_scan` are refused
//! until the next scan, since the scan may be holding a snapshot taken before
//! the release was persisted.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::task::TaskKey;

#[derive(Debug, Default)]
struct Inner {
    running: HashSet<TaskKey>,
    released_since_scan: HashSet<TaskKey>,
}

#[derive(Debug, Clone, Default)]
pub struct InFlight {
    inner: Arc<Mutex<Inner>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start of a scan; call before reading the Store.
    pub fn begin_scan(&self) {
        self.lock().released_since_scan.clear();
    }

    pub fn try_acquire(&self, key: &TaskKey) -> Option<KeyGuard> {
        let mut inner = self.lock();
        if inner.running.contains(key) || inner.released_since_scan.contains(key) {
            return None;
        }
        inner.running.insert(key.clone());
        Some(KeyGuard {
            key: key.clone(),
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

/// Holds one key in the in-flight set until dropped.
#[derive(Debug)]
pub struct KeyGuard {
    key: TaskKey,
    inner: Arc<Mutex<Inner>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut inner = lock(&self.inner);
        inner.running.remove(&self.key);
        inner.released_since_scan.insert(self.key.clone());
    }
}
