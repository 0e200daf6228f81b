//! Worker pool: a `JoinSet` bounded by a `Semaphore` of N permits.
//!
//! - The permit is moved into the spawned attempt and released when it ends
//! - `acquire` races the permit against the shutdown signal
//! - Finished attempts are collected with `try_reap` / `join_next` / `drain`

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinSet;

pub struct WorkerPool<O> {
    permits: Arc<Semaphore>,
    joins: JoinSet<O>,
}

impl<O: Send + 'static> WorkerPool<O> {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            joins: JoinSet::new(),
        }
    }

    /// Wait for a free worker. `None` once shutdown has been requested.
    pub async fn acquire(&self, shutdown: &mut watch::Receiver<bool>) -> Option<OwnedSemaphorePermit> {
        loop {
            if *shutdown.borrow() {
                return None;
            }
            tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => return permit.ok(),
                changed = shutdown.changed() => {
                    // Sender gone: nobody can request shutdown any more.
                    if changed.is_err() {
                        return Arc::clone(&self.permits).acquire_owned().await.ok();
                    }
                }
            }
        }
    }

    pub fn spawn<F>(&mut self, permit: OwnedSemaphorePermit, attempt: F)
    where
        F: Future<Output = O> + Send + 'static,
    {
        self.joins.spawn(async move {
            let out = attempt.await;
            drop(permit);
            out
        });
    }

    pub fn in_flight(&self) -> usize {
        self.joins.len()
    }

    /// Outcomes of attempts that already finished, without waiting.
    pub fn try_reap(&mut self) -> Vec<O> {
        let mut out = Vec::new();
        while let Some(joined) = self.joins.try_join_next() {
            if let Some(o) = Self::unwrap_join(joined) {
                out.push(o);
            }
        }
        out
    }

    /// Next finished attempt. Pending forever while the pool is empty, so it
    /// can sit in a `select!` next to a timer.
    pub async fn join_next(&mut self) -> Option<O> {
        match self.joins.join_next().await {
            Some(joined) => Self::unwrap_join(joined),
            None => std::future::pending().await,
        }
    }

    /// Wait for every running attempt.
    pub async fn drain(&mut self) -> Vec<O> {
        let mut out = Vec::new();
        while let Some(joined) = self.joins.join_next().await {
            if let Some(o) = Self::unwrap_join(joined) {
                out.push(o);
            }
        }
        out
    }

    fn unwrap_join(joined: Result<O, tokio::task::JoinError>) -> Option<O> {
        match joined {
            Ok(o) => Some(o),
            Err(e) => {
                tracing::error!(error = %e, "worker task ended abnormally");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn never_runs_more_than_n_at_once() {
        let (_tx, mut rx) = watch::channel(false);
        let mut pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..6 {
            let permit = pool.acquire(&mut rx).await.unwrap();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.spawn(permit, async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                i
            });
        }

        let mut done = pool.drain().await;
        done.sort_unstable();
        assert_eq!(done, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn acquire_gives_up_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let mut pool: WorkerPool<()> = WorkerPool::new(1);
        let held = pool.acquire(&mut rx).await.unwrap();
        pool.spawn(held, std::future::pending());

        tx.send(true).unwrap();
        assert!(pool.acquire(&mut rx).await.is_none());
    }
}
