//! Retry Manager - scans the Store and drives every outstanding task to Done.
//!
//! # Flow
//! scan (get_pending + get_failed) → plan due set → acquire key guard →
//! acquire worker permit → spawn attempt → exec under deadline → decide →
//! mark_done / mark_failed
//!
//! # Failure handling
//! - Executor errors, timeouts and panics land the record in Failed
//! - Store errors other than `Closed` are logged; the record is picked up
//!   again by a later scan since its persisted state did not change
//! - `StoreError::Closed` stops the Manager with `ManagerError::StoreClosed`
//! - A broken Store invariant (one key both Pending and Failed) stops the
//!   started loop; `ManagerHandle::shutdown` returns the violation
//!
//! Nothing here is authoritative: a restarted Manager rebuilds everything from
//! the Store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

use crate::app::config::ManagerConfig;
use crate::app::due::{self, ScanPlan};
use crate::app::inflight::{InFlight, KeyGuard};
use crate::app::pool::WorkerPool;
use crate::app::status::StatusView;
use crate::domain::decision::{Decision, DefaultDecider};
use crate::domain::errors::{ErrorKind, ManagerError, StoreError};
use crate::domain::ids::AttemptId;
use crate::domain::record::TaskRecord;
use crate::domain::task::Task;
use crate::impls::GuardedExecutor;
use crate::ports::{Clock, ExecContext, Executor, Metrics, Store};

/// How one attempt ended, as seen by the Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Retrying,
    Dead,
    /// The outcome could not be persisted; the Store still holds the prior
    /// state and a later scan retries the task.
    PersistFailed,
    StoreClosed,
}

/// Totals for one `run_cycle`, or for a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub dispatched: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub dead: usize,
    pub persist_errors: usize,
    /// Due records skipped because their key was already running.
    pub skipped_in_flight: usize,
    /// Scans that could not read the Store.
    pub scan_errors: usize,
}

impl CycleReport {
    fn absorb(&mut self, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Succeeded => self.succeeded += 1,
            AttemptOutcome::Retrying => self.retried += 1,
            AttemptOutcome::Dead => self.dead += 1,
            AttemptOutcome::PersistFailed | AttemptOutcome::StoreClosed => {
                self.persist_errors += 1
            }
        }
    }

    fn merge(&mut self, other: &CycleReport) {
        self.dispatched += other.dispatched;
        self.succeeded += other.succeeded;
        self.retried += other.retried;
        self.dead += other.dead;
        self.persist_errors += other.persist_errors;
        self.skipped_in_flight += other.skipped_in_flight;
        self.scan_errors += other.scan_errors;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub scans: u64,
    pub totals: CycleReport,
    /// Attempts that were still running when shutdown began.
    pub drained: usize,
}

/// State shared between the scan loop and the attempts it spawns.
struct Shared<T: Task> {
    store: Arc<dyn Store<T>>,
    executor: GuardedExecutor<T>,
    config: ManagerConfig,
    decider: DefaultDecider,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn Metrics>,
    inflight: InFlight,
}

impl<T: Task> Shared<T> {
    fn status(&self) -> Result<StatusView, ManagerError> {
        let pending = self.store.get_pending()?;
        let failed = self.store.get_failed()?;
        Ok(StatusView::from_snapshots(
            &pending,
            &failed,
            &self.config.retry,
            self.inflight.len(),
        ))
    }
}

struct ScanResult {
    report: CycleReport,
    next_wakeup: Option<DateTime<Utc>>,
}

pub struct Manager<T: Task> {
    shared: Arc<Shared<T>>,
    pool: WorkerPool<AttemptOutcome>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    scans: u64,
    totals: CycleReport,
    store_closed: bool,
}

impl<T: Task> Manager<T> {
    pub fn new(
        store: Arc<dyn Store<T>>,
        executor: Arc<dyn Executor<T>>,
        config: ManagerConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn Metrics>,
    ) -> Result<Self, ManagerError> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = WorkerPool::new(config.workers);
        let decider = DefaultDecider::new(config.retry.clone());
        Ok(Self {
            shared: Arc::new(Shared {
                store,
                executor: GuardedExecutor::new(executor),
                config,
                decider,
                clock,
                metrics,
                inflight: InFlight::new(),
            }),
            pool,
            shutdown_tx,
            shutdown_rx,
            scans: 0,
            totals: CycleReport::default(),
            store_closed: false,
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    pub fn status(&self) -> Result<StatusView, ManagerError> {
        self.shared.status()
    }

    /// One scan, then wait for every attempt it started.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, ManagerError> {
        if self.store_closed {
            return Err(ManagerError::StoreClosed);
        }
        let scan = self.scan().await?;
        let mut report = scan.report;
        for outcome in self.pool.drain().await {
            self.absorb(&mut report, outcome);
        }
        self.totals.merge(&report);
        if self.store_closed {
            return Err(ManagerError::StoreClosed);
        }
        Ok(report)
    }

    /// Run the scan loop on the current runtime until `ManagerHandle::shutdown`.
    pub fn start(self) -> ManagerHandle<T> {
        let shared = Arc::clone(&self.shared);
        let shutdown_tx = self.shutdown_tx.clone();
        let join = tokio::spawn(self.run_loop().instrument(tracing::info_span!("retry_manager")));
        ManagerHandle {
            shared,
            shutdown_tx,
            join,
        }
    }

    /// Drain running attempts and close the Store.
    pub async fn close(mut self) -> Result<ShutdownReport, ManagerError> {
        let _ = self.shutdown_tx.send(true);
        let drained = self.pool.in_flight();
        let mut tail = CycleReport::default();
        for outcome in self.pool.drain().await {
            self.absorb(&mut tail, outcome);
        }
        self.totals.merge(&tail);

        let report = ShutdownReport {
            scans: self.scans,
            totals: self.totals,
            drained,
        };
        if self.store_closed {
            return Err(ManagerError::StoreClosed);
        }
        match self.shared.store.close() {
            Ok(()) => {}
            Err(StoreError::Closed) => return Err(ManagerError::StoreClosed),
            Err(e) => tracing::warn!(error = %e, "store did not close cleanly"),
        }
        tracing::info!(
            scans = report.scans,
            drained = report.drained,
            succeeded = report.totals.succeeded,
            retried = report.totals.retried,
            dead = report.totals.dead,
            "retry manager stopped"
        );
        Ok(report)
    }

    async fn run_loop(mut self) -> Result<ShutdownReport, ManagerError> {
        tracing::info!(
            workers = self.shared.config.workers,
            scan_interval_ms = self.shared.config.scan_interval.as_millis() as u64,
            "retry manager started"
        );
        let mut fatal = None;
        loop {
            if self.stopping() {
                break;
            }
            let wakeup = match self.scan().await {
                Ok(scan) => {
                    self.totals.merge(&scan.report);
                    scan.next_wakeup
                }
                Err(e) if e.kind() == ErrorKind::Fatal => {
                    tracing::error!(error = %e, "stopping scan loop");
                    fatal = Some(e);
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "scan aborted; retrying next tick");
                    None
                }
            };

            let deadline = Instant::now() + self.sleep_for(wakeup);
            loop {
                // A shutdown seen while waiting for a permit has already
                // consumed the change notification.
                if self.stopping() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    changed = self.shutdown_rx.changed() => {
                        if changed.is_err() || *self.shutdown_rx.borrow() {
                            break;
                        }
                    }
                    Some(outcome) = self.pool.join_next() => {
                        let mut report = CycleReport::default();
                        self.absorb(&mut report, outcome);
                        self.totals.merge(&report);
                        if self.store_closed {
                            break;
                        }
                    }
                }
            }
        }

        let report = self.close().await;
        match fatal {
            Some(e) => Err(e),
            None => report,
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown_rx.borrow() || self.store_closed
    }

    /// Sleep until the next tick or the earliest future retry, whichever is
    /// sooner.
    fn sleep_for(&self, next_wakeup: Option<DateTime<Utc>>) -> Duration {
        let interval = self.shared.config.scan_interval;
        match next_wakeup {
            Some(at) => {
                let until = (at - self.shared.clock.now()).to_std().unwrap_or(Duration::ZERO);
                until.min(interval)
            }
            None => interval,
        }
    }

    async fn scan(&mut self) -> Result<ScanResult, ManagerError> {
        self.scans += 1;
        let shared = Arc::clone(&self.shared);
        let mut report = CycleReport::default();

        for outcome in self.pool.try_reap() {
            self.absorb(&mut report, outcome);
        }
        if self.store_closed {
            return Err(ManagerError::StoreClosed);
        }

        shared.inflight.begin_scan();
        let snapshots = shared
            .store
            .get_pending()
            .and_then(|pending| shared.store.get_failed().map(|failed| (pending, failed)));
        let (pending, failed) = match snapshots {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::Fatal => {
                self.store_closed = true;
                return Err(ManagerError::StoreClosed);
            }
            Err(e) => {
                tracing::warn!(error = %e, "store scan failed; retrying next cycle");
                report.scan_errors += 1;
                return Ok(ScanResult {
                    report,
                    next_wakeup: None,
                });
            }
        };

        let now = shared.clock.now();
        let ScanPlan {
            due,
            pending: pending_count,
            failed: failed_count,
            dead,
            next_wakeup,
        } = due::plan(pending, failed, now, &shared.config.retry)?;

        let names = &shared.config.metrics;
        shared.metrics.gauge(&names.pending, pending_count as f64);
        shared.metrics.gauge(&names.failed, failed_count as f64);
        tracing::debug!(
            due = due.len(),
            pending = pending_count,
            failed = failed_count,
            dead,
            "scan"
        );

        for record in due {
            let key = record.key();
            let Some(guard) = shared.inflight.try_acquire(&key) else {
                report.skipped_in_flight += 1;
                continue;
            };
            let Some(permit) = self.pool.acquire(&mut self.shutdown_rx).await else {
                break;
            };
            report.dispatched += 1;
            let span = tracing::info_span!(
                "attempt",
                key = %key,
                kind = record.task.kind(),
                attempt = record.attempt_count + 1
            );
            self.pool
                .spawn(permit, run_attempt(Arc::clone(&shared), record, guard).instrument(span));
        }

        Ok(ScanResult {
            report,
            next_wakeup,
        })
    }

    fn absorb(&mut self, report: &mut CycleReport, outcome: AttemptOutcome) {
        if outcome == AttemptOutcome::StoreClosed {
            self.store_closed = true;
        }
        report.absorb(outcome);
    }
}

/// Handle to a running Manager.
pub struct ManagerHandle<T: Task> {
    shared: Arc<Shared<T>>,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<Result<ShutdownReport, ManagerError>>,
}

impl<T: Task> ManagerHandle<T> {
    pub fn status(&self) -> Result<StatusView, ManagerError> {
        self.shared.status()
    }

    /// True once the scan loop has exited on its own (closed store, broken
    /// invariant).
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop dispatching, wait for running attempts, close the Store.
    pub async fn shutdown(self) -> Result<ShutdownReport, ManagerError> {
        let _ = self.shutdown_tx.send(true);
        self.join
            .await
            .map_err(|e| ManagerError::Join(e.to_string()))?
    }
}

async fn run_attempt<T: Task>(
    shared: Arc<Shared<T>>,
    mut record: TaskRecord<T>,
    _guard: KeyGuard,
) -> AttemptOutcome {
    let names = &shared.config.metrics;
    let started_at = shared.clock.now();
    let ctx = ExecContext {
        attempt_id: AttemptId::generate(started_at),
        attempt: record.attempt_count.saturating_add(1),
        deadline: Instant::now() + shared.config.exec_timeout,
    };

    shared.metrics.incr(&names.attempts, 1);
    let timer = Instant::now();
    let result = shared.executor.exec(&record.task, &ctx).await;
    shared.metrics.timing(&names.exec_duration, timer.elapsed());

    let decision = shared.decider.decide(record.attempt_count, &result);
    let now = shared.clock.now();
    let error = match &result {
        Ok(()) => String::new(),
        Err(e) => e.to_string(),
    };

    match decision {
        Decision::Complete => {
            shared.metrics.incr(&names.successes, 1);
            tracing::debug!(attempt_id = %ctx.attempt_id, "attempt succeeded");
            persist(shared.store.mark_done(&record), AttemptOutcome::Succeeded)
        }
        Decision::Retry { delay, reason } => {
            shared.metrics.incr(&names.failures, 1);
            record.record_failure(error, now, after(now, delay), &shared.config.retry);
            tracing::info!(attempt_id = %ctx.attempt_id, %reason, "attempt failed");
            persist(shared.store.mark_failed(&record), AttemptOutcome::Retrying)
        }
        Decision::MarkDead { reason } => {
            shared.metrics.incr(&names.failures, 1);
            shared.metrics.incr(&names.permanent_failures, 1);
            record.record_failure(error, now, now, &shared.config.retry);
            tracing::warn!(
                attempt_id = %ctx.attempt_id,
                task = %record.task.describe(),
                %reason,
                "task failed permanently"
            );
            persist(shared.store.mark_failed(&record), AttemptOutcome::Dead)
        }
    }
}

fn persist(result: Result<(), StoreError>, on_success: AttemptOutcome) -> AttemptOutcome {
    match result {
        Ok(()) => on_success,
        Err(e) if e.kind() == ErrorKind::Fatal => {
            tracing::error!("store closed while persisting attempt outcome");
            AttemptOutcome::StoreClosed
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to persist attempt outcome; retrying next scan");
            AttemptOutcome::PersistFailed
        }
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
