mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use common::{Scripted, blob, config, manager, t0};
use tether_core::domain::{DeferredTask, ReplicationTask, TaskRecord, WritebackTask};
use tether_core::impls::{InMemoryMetrics, InMemoryStore, SqliteStore};
use tether_core::ports::{FixedClock, Store, submit};
use tether_core::{ManagerConfig, Task};

fn keys(store: &dyn Store<WritebackTask>) -> BTreeSet<String> {
    let pending = store.get_pending().unwrap();
    let failed = store.get_failed().unwrap();
    pending
        .iter()
        .chain(failed.iter())
        .map(|r| r.key().to_string())
        .collect()
}

/// N pending plus M failed records whose backoff already elapsed.
fn seed(store: &dyn Store<WritebackTask>, n: usize, m: usize, config: &ManagerConfig) {
    for i in 0..n {
        store
            .mark_pending(&TaskRecord::pending(blob(&format!("pending-{i}")), t0()))
            .unwrap();
    }
    for i in 0..m {
        let mut r = TaskRecord::pending(blob(&format!("failed-{i}")), t0() - ChronoDuration::hours(1));
        r.record_failure(
            "503",
            t0() - ChronoDuration::minutes(30),
            t0() - ChronoDuration::minutes(29),
            &config.retry,
        );
        store.mark_failed(&r).unwrap();
    }
}

#[tokio::test]
async fn fresh_manager_runs_every_pending_and_due_failed_task() {
    let store = Arc::new(InMemoryStore::<WritebackTask>::new());
    let cfg = config(3);
    seed(&*store, 5, 4, &cfg);

    let executor = Arc::new(Scripted::with_delay(Duration::from_millis(5)));
    let clock = FixedClock::new(t0());
    let mut m = manager(
        store.clone(),
        executor.clone(),
        &clock,
        Arc::new(InMemoryMetrics::new()),
        cfg,
    );

    let report = m.run_cycle().await.unwrap();
    assert_eq!(report.dispatched, 9);
    assert_eq!(report.succeeded, 9);
    assert!(store.is_empty());

    let called: BTreeSet<String> = executor.calls().into_iter().collect();
    assert_eq!(called.len(), 9);
    assert_eq!(executor.max_concurrent_per_key(), 1);
}

#[tokio::test(start_paused = true)]
async fn running_key_is_never_dispatched_twice() {
    let store = Arc::new(InMemoryStore::<WritebackTask>::new());
    let executor = Arc::new(Scripted::with_delay(Duration::from_millis(400)));
    let clock = FixedClock::new(t0());
    submit(&*store, blob("slow"), &clock).unwrap();

    let mut cfg = config(4);
    cfg.scan_interval = Duration::from_millis(10);
    let handle = manager(
        store.clone(),
        executor.clone(),
        &clock,
        Arc::new(InMemoryMetrics::new()),
        cfg,
    )
    .start();

    tokio::time::sleep(Duration::from_secs(1)).await;
    let report = handle.shutdown().await.unwrap();

    assert_eq!(executor.calls_for("slow"), 1);
    assert_eq!(executor.max_concurrent_per_key(), 1);
    assert!(report.totals.skipped_in_flight > 0);
    assert!(report.scans > 1);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn started_manager_retries_after_backoff_and_shuts_down() {
    let store = Arc::new(InMemoryStore::<WritebackTask>::new());
    let executor = Arc::new(Scripted::new());
    executor.fail("flaky", 2);
    let clock = FixedClock::new(t0());
    submit(&*store, blob("flaky"), &clock).unwrap();

    let handle = manager(
        store.clone(),
        executor.clone(),
        &clock,
        Arc::new(InMemoryMetrics::new()),
        config(2),
    )
    .start();

    // The manager's clock is fixed, so move it past each backoff by hand.
    for _ in 0..2 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        clock.advance(Duration::from_secs(5));
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.status().unwrap().outstanding(), 0);

    let report = handle.shutdown().await.unwrap();
    assert_eq!(report.totals.retried, 2);
    assert_eq!(report.totals.succeeded, 1);
    assert_eq!(executor.calls_for("flaky"), 3);
    assert!(matches!(
        store.get_pending(),
        Err(tether_core::StoreError::Closed)
    ));
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_running_attempt() {
    let store = Arc::new(InMemoryStore::<WritebackTask>::new());
    let executor = Arc::new(Scripted::with_delay(Duration::from_secs(2)));
    let clock = FixedClock::new(t0());
    submit(&*store, blob("in-progress"), &clock).unwrap();

    let handle = manager(
        store.clone(),
        executor.clone(),
        &clock,
        Arc::new(InMemoryMetrics::new()),
        config(1),
    )
    .start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let report = handle.shutdown().await.unwrap();
    assert_eq!(report.drained, 1);
    assert_eq!(report.totals.succeeded, 1);
    assert_eq!(executor.calls_for("in-progress"), 1);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_dispatch_waits_for_a_worker_is_prompt() {
    let store = Arc::new(InMemoryStore::<WritebackTask>::new());
    let executor = Arc::new(Scripted::with_delay(Duration::from_millis(100)));
    let clock = FixedClock::new(t0());
    for digest in ["queued-1", "queued-2", "queued-3"] {
        submit(&*store, blob(digest), &clock).unwrap();
    }
    let mut cfg = config(1);
    cfg.scan_interval = Duration::from_secs(60);

    let handle = manager(
        store.clone(),
        executor.clone(),
        &clock,
        Arc::new(InMemoryMetrics::new()),
        cfg,
    )
    .start();
    // The scan holds the only worker and is parked on the second task.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let asked = tokio::time::Instant::now();
    let report = handle.shutdown().await.unwrap();
    assert!(asked.elapsed() < Duration::from_secs(1), "{:?}", asked.elapsed());
    assert_eq!(report.totals.succeeded, 1);
    assert_eq!(executor.calls().len(), 1);
}

#[tokio::test]
async fn restart_against_sqlite_loses_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("retry.db");
    let cfg = config(2);
    let clock = FixedClock::new(t0());

    let executor = Arc::new(Scripted::new());
    executor.fail("failed-0", 1);
    executor.fail("pending-1", 1);

    let expected = {
        let store = SqliteStore::<WritebackTask>::open(&path).unwrap();
        seed(&store, 3, 2, &cfg);
        keys(&store)
    };
    assert_eq!(expected.len(), 5);

    // First run: some tasks succeed, two fail and are persisted as Failed.
    {
        let store: Arc<SqliteStore<WritebackTask>> = Arc::new(SqliteStore::open(&path).unwrap());
        let mut m = manager(
            store.clone(),
            executor.clone(),
            &clock,
            Arc::new(InMemoryMetrics::new()),
            cfg.clone(),
        );
        let report = m.run_cycle().await.unwrap();
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.retried, 2);
        m.close().await.unwrap();
    }

    clock.advance(Duration::from_secs(30));

    // Second run after "restart": picks up the persisted failures.
    {
        let store: Arc<SqliteStore<WritebackTask>> = Arc::new(SqliteStore::open(&path).unwrap());
        assert_eq!(keys(&*store).len(), 2);
        let mut m = manager(
            store.clone(),
            executor.clone(),
            &clock,
            Arc::new(InMemoryMetrics::new()),
            cfg.clone(),
        );
        let report = m.run_cycle().await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert!(keys(&*store).is_empty());
        m.close().await.unwrap();
    }

    let completed: BTreeSet<String> = executor
        .calls()
        .into_iter()
        .map(|d| blob(&d).key().to_string())
        .collect();
    assert_eq!(completed, expected);
}

#[test]
fn deferred_tasks_survive_reopen_with_their_kind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("retry.db");
    let clock = FixedClock::new(t0());

    {
        let store = SqliteStore::<DeferredTask>::open(&path).unwrap();
        submit::<DeferredTask>(&store, WritebackTask::new("library", "sha256:aa").into(), &clock).unwrap();
        submit::<DeferredTask>(
            &store,
            ReplicationTask::new("app:v1", "sha256:bb", "zone2", vec!["sha256:aa".into()]).into(),
            &clock,
        )
        .unwrap();
        store.close().unwrap();
    }

    let store = SqliteStore::<DeferredTask>::open(&path).unwrap();
    let mut kinds: Vec<&str> = store
        .get_pending()
        .unwrap()
        .iter()
        .map(|r| r.task.kind())
        .collect();
    kinds.sort_unstable();
    assert_eq!(kinds, vec!["replicate", "writeback"]);
}
