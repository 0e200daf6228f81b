#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use tether_core::app::{Manager, ManagerConfig};
use tether_core::domain::{ExecError, RetryPolicy, WritebackTask};
use tether_core::impls::InMemoryMetrics;
use tether_core::ports::{ExecContext, Executor, FixedClock, Store};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

pub fn blob(digest: &str) -> WritebackTask {
    WritebackTask::new("library", digest)
}

/// No jitter, 1s base, doubling, 60s cap.
pub fn config(workers: usize) -> ManagerConfig {
    ManagerConfig {
        workers,
        exec_timeout: Duration::from_secs(5),
        scan_interval: Duration::from_millis(50),
        retry: RetryPolicy {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            max_attempts: Some(10),
        },
        ..ManagerConfig::default()
    }
}

pub fn manager(
    store: Arc<dyn Store<WritebackTask>>,
    executor: Arc<Scripted>,
    clock: &FixedClock,
    metrics: Arc<InMemoryMetrics>,
    config: ManagerConfig,
) -> Manager<WritebackTask> {
    Manager::new(store, executor, config, Arc::new(clock.clone()), metrics).unwrap()
}

/// Executor with per-digest scripted failures that records every call and
/// the peak number of concurrent calls per digest.
#[derive(Default)]
pub struct Scripted {
    failures: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<String>>,
    running: Mutex<HashMap<String, usize>>,
    max_per_key: AtomicUsize,
    delay: Duration,
}

impl Scripted {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` first.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail(&self, digest: &str, times: u32) {
        self.failures.lock().unwrap().insert(digest.to_string(), times);
    }

    pub fn always_fail(&self, digest: &str) {
        self.fail(digest, u32::MAX);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, digest: &str) -> usize {
        self.calls().iter().filter(|d| d.as_str() == digest).count()
    }

    pub fn max_concurrent_per_key(&self) -> usize {
        self.max_per_key.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor<WritebackTask> for Scripted {
    async fn exec(&self, task: &WritebackTask, _ctx: &ExecContext) -> Result<(), ExecError> {
        {
            let mut running = self.running.lock().unwrap();
            let n = running.entry(task.digest.clone()).or_default();
            *n += 1;
            self.max_per_key.fetch_max(*n, Ordering::SeqCst);
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        *self.running.lock().unwrap().get_mut(&task.digest).unwrap() -= 1;
        self.calls.lock().unwrap().push(task.digest.clone());

        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&task.digest) {
            Some(n) if *n > 0 => {
                if *n != u32::MAX {
                    *n -= 1;
                }
                Err(ExecError::failed(format!("backend rejected {}", task.digest)))
            }
            _ => Ok(()),
        }
    }
}
