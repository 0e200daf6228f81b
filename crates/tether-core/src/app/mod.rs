//! App - composes the ports into the running engine.
//!
//! # Components
//! - **Manager**: scan loop, due set, worker pool, outcome persistence
//! - **EngineBuilder**: ordered construction and startup validation
//! - **Heartbeat**: periodic liveness metric
//! - **StatusView**: pending / failed / dead / in-flight counts

pub mod config;
pub mod due;
pub mod engine;
pub mod heartbeat;
pub mod inflight;
pub mod manager;
pub mod pool;
pub mod status;

pub use self::config::{ManagerConfig, ManagerSettings, MetricNames, RetrySettings};
pub use self::engine::{BuildError, Engine, EngineBuilder, RunningEngine};
pub use self::heartbeat::Heartbeat;
pub use self::manager::{AttemptOutcome, CycleReport, Manager, ManagerHandle, ShutdownReport};
pub use self::status::{DeadTask, StatusView};
