//! Impls - implementations of the ports.
//!
//! # Stores
//! - **InMemoryStore**: tests and embedding, with fault injection
//! - **SqliteStore**: durable store on a local SQLite file
//!
//! # Executors
//! - **GuardedExecutor**: deadline and panic containment around any executor
//! - **KindRouter**: per-kind handler registry
//! - **FnExecutor**: async closure adapter
//!
//! # Metrics
//! - **NoopMetrics**, **InMemoryMetrics**, **FacadeMetrics**

pub mod adapters;
pub mod memory_store;
pub mod metrics;
pub mod router;
pub mod sqlite_store;

pub use self::adapters::{FnExecutor, GuardedExecutor};
pub use self::memory_store::InMemoryStore;
pub use self::metrics::{FacadeMetrics, InMemoryMetrics, NoopMetrics};
pub use self::router::{Handler, KindRouter, RegistryError};
pub use self::sqlite_store::SqliteStore;
