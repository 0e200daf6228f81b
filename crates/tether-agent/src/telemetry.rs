//! Metrics recorder for the agent.
//!
//! The engine records through the `metrics` facade. The agent has no scrape
//! endpoint, so this recorder keeps running totals per metric and writes each
//! counter and gauge update to the log at `info` (target `tether::metrics`).
//! Timings go out at `debug`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
    SharedString, Unit,
};

#[derive(Debug, Clone, Default)]
pub struct LogRecorder {
    registry: Arc<Registry>,
}

#[derive(Debug, Default)]
struct Registry {
    counters: Mutex<HashMap<String, Arc<LoggedCounter>>>,
    gauges: Mutex<HashMap<String, Arc<LoggedGauge>>>,
}

impl LogRecorder {
    /// Install as the process-wide recorder. Only the first call succeeds.
    pub fn install() -> anyhow::Result<()> {
        metrics::set_global_recorder(Self::default())
            .map_err(|_| anyhow::anyhow!("a metrics recorder is already installed"))
    }

    #[cfg(test)]
    fn counter_total(&self, name: &str) -> u64 {
        let counters = self.registry.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters
            .get(name)
            .map_or(0, |c| c.total.load(Ordering::Relaxed))
    }

    #[cfg(test)]
    fn gauge_value(&self, name: &str) -> Option<f64> {
        let gauges = self.registry.gauges.lock().unwrap_or_else(|e| e.into_inner());
        gauges.get(name).map(|g| g.get())
    }

    fn counter(&self, name: &str) -> Arc<LoggedCounter> {
        let mut counters = self.registry.counters.lock().unwrap_or_else(|e| e.into_inner());
        let entry = counters.entry(name.to_string()).or_insert_with(|| {
            Arc::new(LoggedCounter {
                name: name.to_string(),
                total: AtomicU64::new(0),
            })
        });
        Arc::clone(entry)
    }

    fn gauge(&self, name: &str) -> Arc<LoggedGauge> {
        let mut gauges = self.registry.gauges.lock().unwrap_or_else(|e| e.into_inner());
        let entry = gauges.entry(name.to_string()).or_insert_with(|| {
            Arc::new(LoggedGauge {
                name: name.to_string(),
                bits: AtomicU64::new(0f64.to_bits()),
            })
        });
        Arc::clone(entry)
    }
}

impl Recorder for LogRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(self.counter(key.name()))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(self.gauge(key.name()))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(Arc::new(LoggedTiming {
            name: key.name().to_string(),
        }))
    }
}

#[derive(Debug)]
struct LoggedCounter {
    name: String,
    total: AtomicU64,
}

impl CounterFn for LoggedCounter {
    fn increment(&self, value: u64) {
        let total = self.total.fetch_add(value, Ordering::Relaxed) + value;
        tracing::info!(target: "tether::metrics", metric = %self.name, by = value, total, "counter");
    }

    fn absolute(&self, value: u64) {
        self.total.fetch_max(value, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct LoggedGauge {
    name: String,
    bits: AtomicU64,
}

impl LoggedGauge {
    fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    fn update(&self, f: impl Fn(f64) -> f64) {
        let _ = self
            .bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |b| {
                Some(f(f64::from_bits(b)).to_bits())
            });
        tracing::info!(target: "tether::metrics", metric = %self.name, value = self.get(), "gauge");
    }
}

impl GaugeFn for LoggedGauge {
    fn increment(&self, value: f64) {
        self.update(|v| v + value);
    }

    fn decrement(&self, value: f64) {
        self.update(|v| v - value);
    }

    fn set(&self, value: f64) {
        self.update(|_| value);
    }
}

#[derive(Debug)]
struct LoggedTiming {
    name: String,
}

impl HistogramFn for LoggedTiming {
    fn record(&self, value: f64) {
        tracing::debug!(target: "tether::metrics", metric = %self.name, seconds = value, "timing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    use tether_core::impls::FacadeMetrics;
    use tether_core::ports::Metrics;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt::MakeWriter;

    use crate::config::AgentConfig;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn heartbeat_is_recorded_and_logged_at_default_level() {
        let config = AgentConfig::default();
        let heartbeat = config.manager.metrics.heartbeat.clone();
        let recorder = LogRecorder::default();
        let logs = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(&config.log.level))
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            metrics::with_local_recorder(&recorder, || {
                let sink = FacadeMetrics;
                sink.incr(&heartbeat, 1);
                sink.incr(&heartbeat, 1);
            })
        });

        assert_eq!(recorder.counter_total(&heartbeat), 2);
        let text = logs.text();
        assert!(text.contains("retry.heartbeat"), "{text}");
        assert!(text.contains("total=2"), "{text}");
    }

    #[test]
    fn gauges_keep_the_last_value() {
        let recorder = LogRecorder::default();
        metrics::with_local_recorder(&recorder, || {
            let sink = FacadeMetrics;
            sink.gauge("retry.pending", 4.0);
            sink.gauge("retry.pending", 1.0);
            sink.timing("retry.exec_duration", std::time::Duration::from_millis(3));
        });
        assert_eq!(recorder.gauge_value("retry.pending"), Some(1.0));
        assert_eq!(recorder.gauge_value("retry.failed"), None);
        assert_eq!(recorder.counter_total("retry.attempts"), 0);
    }
}
