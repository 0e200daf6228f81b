//! tether-core
//!
//! Persisted retry engine: tasks are written to a durable Store, executed by
//! a bounded worker pool, and retried with capped exponential backoff until
//! they succeed or hit the attempt ceiling.
//!
//! # Modules
//! - **domain**: Task trait, task kinds, records, retry policy, decisions, errors
//! - **ports**: Store, Executor, Clock, Metrics traits
//! - **impls**: in-memory and SQLite stores, executor adapters, metrics sinks
//! - **app**: Manager, EngineBuilder, Heartbeat, status views

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{EngineBuilder, Manager, ManagerConfig, StatusView};
pub use domain::{DeferredTask, ExecError, StoreError, Task, TaskKey, TaskRecord};
pub use ports::{Executor, Store};
