//! Bootstrap - turns an `AgentConfig` into running pieces.
//!
//! Order: tracing → metrics → store → handlers → engine. Each step returns an error
//! instead of exiting so `main` decides how to report it.

use std::sync::Arc;

use anyhow::Context as _;
use tether_core::app::{Engine, EngineBuilder, ManagerConfig};
use tether_core::domain::{DeferredTask, ReplicationTask, WritebackTask};
use tether_core::impls::{FacadeMetrics, SqliteStore};
use tether_core::ports::{Metrics, Store};
use tracing_subscriber::EnvFilter;

use crate::config::AgentConfig;
use crate::telemetry::LogRecorder;
use crate::writeback::{BlobDirs, ReplicationHandler, WritebackHandler};

/// `RUST_LOG` wins over the configured level.
pub fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}

/// Route engine metrics to the log. Call once per process.
pub fn init_metrics() -> anyhow::Result<()> {
    LogRecorder::install()
}

pub fn open_store(config: &AgentConfig) -> anyhow::Result<Arc<dyn Store<DeferredTask>>> {
    let store = SqliteStore::<DeferredTask>::open(&config.store.path)
        .with_context(|| format!("failed to open store {}", config.store.path.display()))?;
    tracing::debug!(path = %config.store.path.display(), "store opened");
    Ok(Arc::new(store))
}

pub fn manager_config(config: &AgentConfig) -> anyhow::Result<ManagerConfig> {
    config
        .manager
        .clone()
        .into_config()
        .context("invalid [manager] configuration")
}

pub fn build_engine(
    config: &AgentConfig,
    store: Arc<dyn Store<DeferredTask>>,
    metrics: Arc<dyn Metrics>,
) -> anyhow::Result<Engine<DeferredTask>> {
    let dirs = Arc::new(BlobDirs::from(&config.writeback));

    let mut builder = EngineBuilder::new(manager_config(config)?)
        .store(store)
        .metrics(metrics)
        .register(WritebackTask::KIND, WritebackHandler::new(Arc::clone(&dirs)))?
        .register(ReplicationTask::KIND, ReplicationHandler::new(dirs))?
        .expect_kinds(&[WritebackTask::KIND, ReplicationTask::KIND]);
    if let Some(interval) = config.heartbeat.interval() {
        builder = builder.heartbeat(interval);
    }

    let engine = builder.build()?;
    tracing::info!(
        store = %config.store.path.display(),
        workers = engine.manager().config().workers,
        "engine ready"
    );
    Ok(engine)
}

/// Store + engine recording through the process-wide metrics recorder.
pub fn engine_from_config(config: &AgentConfig) -> anyhow::Result<Engine<DeferredTask>> {
    let store = open_store(config)?;
    build_engine(config, store, Arc::new(FacadeMetrics))
}
