//! Metrics implementations.
//!
//! - `NoopMetrics`: discards everything
//! - `InMemoryMetrics`: keeps values for assertions and status output
//! - `FacadeMetrics`: records through the `metrics` crate macros

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::ports::Metrics;

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn incr(&self, _name: &str, _by: u64) {}

    fn timing(&self, _name: &str, _elapsed: Duration) {}

    fn gauge(&self, _name: &str, _value: f64) {}
}

#[derive(Debug, Default)]
struct Samples {
    counters: HashMap<String, u64>,
    timings: HashMap<String, Vec<Duration>>,
    gauges: HashMap<String, f64>,
}

#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    samples: Mutex<Samples>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.with(|s| s.counters.get(name).copied().unwrap_or(0))
    }

    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.with(|s| s.gauges.get(name).copied())
    }

    pub fn timing_count(&self, name: &str) -> usize {
        self.with(|s| s.timings.get(name).map_or(0, Vec::len))
    }

    fn with<R>(&self, f: impl FnOnce(&mut Samples) -> R) -> R {
        let mut guard = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

impl Metrics for InMemoryMetrics {
    fn incr(&self, name: &str, by: u64) {
        self.with(|s| *s.counters.entry(name.to_string()).or_default() += by);
    }

    fn timing(&self, name: &str, elapsed: Duration) {
        self.with(|s| s.timings.entry(name.to_string()).or_default().push(elapsed));
    }

    fn gauge(&self, name: &str, value: f64) {
        self.with(|s| {
            s.gauges.insert(name.to_string(), value);
        });
    }
}

/// Forwards to the `metrics` facade. Whatever recorder the process installs
/// (an exporter, a log recorder) receives the samples; without one they are
/// dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct FacadeMetrics;

impl Metrics for FacadeMetrics {
    fn incr(&self, name: &str, by: u64) {
        ::metrics::counter!(name.to_string()).increment(by);
    }

    fn timing(&self, name: &str, elapsed: Duration) {
        ::metrics::histogram!(name.to_string()).record(elapsed.as_secs_f64());
    }

    fn gauge(&self, name: &str, value: f64) {
        ::metrics::gauge!(name.to_string()).set(value);
    }
}
