//! EngineBuilder - wires Store, Executor and Manager in a fixed order.
//!
//! # Steps (`build`)
//! 1. validate the Manager config
//! 2. require a Store
//! 3. check that every expected kind has a handler in the router
//! 4. construct the Manager
//!
//! Nothing here exits the process; every failure is a `BuildError`.

use std::sync::Arc;
use std::time::Duration;

use crate::app::config::ManagerConfig;
use crate::app::heartbeat::Heartbeat;
use crate::app::manager::{Manager, ManagerHandle, ShutdownReport};
use crate::app::status::StatusView;
use crate::domain::errors::ManagerError;
use crate::domain::task::Task;
use crate::impls::{Handler, KindRouter, NoopMetrics, RegistryError};
use crate::ports::{Clock, Metrics, Store, SystemClock};

/// # Example
/// ```ignore
/// let engine = EngineBuilder::new(config)
///     .store(store)
///     .register(WritebackTask::KIND, WritebackHandler::new(dirs))?
///     .expect_kinds(&[WritebackTask::KIND, ReplicationTask::KIND])
///     .heartbeat(Duration::from_secs(10))
///     .build()?;
/// let running = engine.start();
/// ```
pub struct EngineBuilder<T: Task> {
    config: ManagerConfig,
    store: Option<Arc<dyn Store<T>>>,
    router: KindRouter<T>,
    expected_kinds: Vec<&'static str>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn Metrics>,
    heartbeat: Option<Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no store configured")]
    MissingStore,

    #[error("missing handlers for kinds: {0:?}")]
    MissingKinds(Vec<String>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Manager(#[from] ManagerError),
}

impl<T: Task> EngineBuilder<T> {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            store: None,
            router: KindRouter::new(),
            expected_kinds: Vec::new(),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(NoopMetrics),
            heartbeat: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn Store<T>>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn register<H: Handler<T> + 'static>(
        mut self,
        kind: &'static str,
        handler: H,
    ) -> Result<Self, BuildError> {
        self.router.register(kind, handler)?;
        Ok(self)
    }

    /// Kinds that must have a handler for `build` to succeed.
    pub fn expect_kinds(mut self, kinds: &[&'static str]) -> Self {
        self.expected_kinds = kinds.to_vec();
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }

    pub fn build(self) -> Result<Engine<T>, BuildError> {
        self.config.validate()?;

        let store = self.store.ok_or(BuildError::MissingStore)?;

        let registered = self.router.registered_kinds();
        let missing: Vec<String> = self
            .expected_kinds
            .iter()
            .filter(|k| !registered.contains(*k))
            .map(|k| k.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::MissingKinds(missing));
        }

        let heartbeat_name = self.config.metrics.heartbeat.clone();
        let manager = Manager::new(
            store,
            Arc::new(self.router),
            self.config,
            self.clock,
            Arc::clone(&self.metrics),
        )?;
        tracing::debug!(kinds = ?registered, "engine built");

        Ok(Engine {
            manager,
            metrics: self.metrics,
            heartbeat: self.heartbeat.map(|interval| (interval, heartbeat_name)),
        })
    }
}

/// A built, not yet running engine.
pub struct Engine<T: Task> {
    manager: Manager<T>,
    metrics: Arc<dyn Metrics>,
    heartbeat: Option<(Duration, String)>,
}

impl<T: Task> Engine<T> {
    pub fn manager(&self) -> &Manager<T> {
        &self.manager
    }

    /// For one-shot use (`run_cycle` then `Manager::close`).
    pub fn into_manager(self) -> Manager<T> {
        self.manager
    }

    pub fn status(&self) -> Result<StatusView, ManagerError> {
        self.manager.status()
    }

    pub fn start(self) -> RunningEngine<T> {
        let heartbeat = self
            .heartbeat
            .map(|(interval, name)| Heartbeat::spawn(interval, Arc::clone(&self.metrics), name));
        RunningEngine {
            handle: self.manager.start(),
            heartbeat,
        }
    }
}

pub struct RunningEngine<T: Task> {
    handle: ManagerHandle<T>,
    heartbeat: Option<Heartbeat>,
}

impl<T: Task> RunningEngine<T> {
    pub fn status(&self) -> Result<StatusView, ManagerError> {
        self.handle.status()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the heartbeat, then the Manager.
    pub async fn shutdown(self) -> Result<ShutdownReport, ManagerError> {
        if let Some(heartbeat) = self.heartbeat {
            heartbeat.stop().await;
        }
        self.handle.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ExecError;
    use crate::domain::kinds::{DeferredTask, ReplicationTask, WritebackTask};
    use crate::impls::InMemoryStore;
    use crate::ports::ExecContext;
    use async_trait::async_trait;

    struct Accept;

    #[async_trait]
    impl Handler<DeferredTask> for Accept {
        async fn handle(&self, _task: &DeferredTask, _ctx: &ExecContext) -> Result<(), ExecError> {
            Ok(())
        }
    }

    fn store() -> Arc<dyn Store<DeferredTask>> {
        Arc::new(InMemoryStore::new())
    }

    #[test]
    fn build_succeeds_when_expected_kinds_are_registered() {
        let engine = EngineBuilder::new(ManagerConfig::default())
            .store(store())
            .register(WritebackTask::KIND, Accept)
            .unwrap()
            .expect_kinds(&[WritebackTask::KIND])
            .build();
        assert!(engine.is_ok());
    }

    #[test]
    fn build_reports_missing_kinds() {
        let engine = EngineBuilder::new(ManagerConfig::default())
            .store(store())
            .register(WritebackTask::KIND, Accept)
            .unwrap()
            .expect_kinds(&[WritebackTask::KIND, ReplicationTask::KIND])
            .build();
        assert!(matches!(
            engine,
            Err(BuildError::MissingKinds(missing)) if missing == vec!["replicate".to_string()]
        ));
    }

    #[test]
    fn build_requires_a_store() {
        let engine = EngineBuilder::<DeferredTask>::new(ManagerConfig::default()).build();
        assert!(matches!(engine, Err(BuildError::MissingStore)));
    }

    #[test]
    fn duplicate_handler_is_a_build_error() {
        let result = EngineBuilder::<DeferredTask>::new(ManagerConfig::default())
            .register(WritebackTask::KIND, Accept)
            .unwrap()
            .register(WritebackTask::KIND, Accept);
        assert!(matches!(result, Err(BuildError::Registry(_))));
    }

    #[tokio::test]
    async fn started_engine_shuts_down_cleanly() {
        let running = EngineBuilder::new(ManagerConfig::default())
            .store(store())
            .register(WritebackTask::KIND, Accept)
            .unwrap()
            .heartbeat(Duration::from_millis(10))
            .build()
            .unwrap()
            .start();
        assert_eq!(running.status().unwrap().outstanding(), 0);
        let report = running.shutdown().await.unwrap();
        assert_eq!(report.totals.dispatched, 0);
    }
}
