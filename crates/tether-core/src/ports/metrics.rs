//! Metrics port - counters, timers and gauges for a process-wide collector.
//!
//! Names are passed in by the caller (see `app::config::MetricNames`); the
//! engine never hardcodes them.

use std::time::Duration;

pub trait Metrics: Send + Sync {
    fn incr(&self, name: &str, by: u64);

    fn timing(&self, name: &str, elapsed: Duration);

    fn gauge(&self, name: &str, value: f64);
}
