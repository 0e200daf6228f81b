//! Manager configuration.
//!
//! Two layers:
//! - `ManagerSettings` / `RetrySettings`: serde shape of the `[manager]`
//!   table, plain integers, every field defaulted
//! - `ManagerConfig`: what the Manager runs with, built via `into_config`
//!   and checked by `validate`

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::errors::ManagerError;
use crate::domain::retry::RetryPolicy;

/// Metric names emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricNames {
    pub attempts: String,
    pub successes: String,
    pub failures: String,
    pub permanent_failures: String,
    pub exec_duration: String,
    pub heartbeat: String,
    pub pending: String,
    pub failed: String,
}

impl Default for MetricNames {
    fn default() -> Self {
        Self {
            attempts: "retry.attempts".into(),
            successes: "retry.successes".into(),
            failures: "retry.failures".into(),
            permanent_failures: "retry.permanent_failures".into(),
            exec_duration: "retry.exec_duration".into(),
            heartbeat: "retry.heartbeat".into(),
            pending: "retry.pending".into(),
            failed: "retry.failed".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Size of the worker pool.
    pub workers: usize,

    /// Budget for a single `Executor::exec` call.
    pub exec_timeout: Duration,

    /// Maximum time between two scans of the Store.
    pub scan_interval: Duration,

    pub retry: RetryPolicy,
    pub metrics: MetricNames,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            exec_timeout: Duration::from_secs(30),
            scan_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            metrics: MetricNames::default(),
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<(), ManagerError> {
        let invalid = |msg: &str| Err(ManagerError::InvalidConfig(msg.to_string()));

        if self.workers == 0 {
            return invalid("workers must be at least 1");
        }
        if self.exec_timeout.is_zero() {
            return invalid("exec_timeout must be positive");
        }
        if self.scan_interval.is_zero() {
            return invalid("scan_interval must be positive");
        }

        let retry = &self.retry;
        if !(0.0..1.0).contains(&retry.jitter) {
            return invalid("retry.jitter must be in [0, 1)");
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return invalid("retry.multiplier must be >= 1");
        }
        if retry.base_delay.is_zero() {
            return invalid("retry.base_delay must be positive");
        }
        if retry.max_delay < retry.base_delay {
            return invalid("retry.max_delay must be >= retry.base_delay");
        }
        if retry.max_attempts == Some(0) {
            return invalid("retry.max_attempts must be at least 1 when set");
        }
        Ok(())
    }
}

/// `[manager.retry]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: f64,
    /// 0 retries forever.
    pub max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            base_delay_ms: policy.base_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            jitter: policy.jitter,
            max_attempts: policy.max_attempts.unwrap_or(0),
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        RetryPolicy {
            base_delay: Duration::from_millis(s.base_delay_ms),
            multiplier: s.multiplier,
            max_delay: Duration::from_millis(s.max_delay_ms),
            jitter: s.jitter,
            max_attempts: (s.max_attempts > 0).then_some(s.max_attempts),
        }
    }
}

/// `[manager]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSettings {
    pub workers: usize,
    pub exec_timeout_secs: u64,
    pub scan_interval_ms: u64,
    pub retry: RetrySettings,
    pub metrics: MetricNames,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        let config = ManagerConfig::default();
        Self {
            workers: config.workers,
            exec_timeout_secs: config.exec_timeout.as_secs(),
            scan_interval_ms: config.scan_interval.as_millis() as u64,
            retry: RetrySettings::default(),
            metrics: MetricNames::default(),
        }
    }
}

impl ManagerSettings {
    pub fn into_config(self) -> Result<ManagerConfig, ManagerError> {
        let config = ManagerConfig {
            workers: self.workers,
            exec_timeout: Duration::from_secs(self.exec_timeout_secs),
            scan_interval: Duration::from_millis(self.scan_interval_ms),
            retry: RetryPolicy::from(&self.retry),
            metrics: self.metrics,
        };
        config.validate()?;
        Ok(config)
    }
}
