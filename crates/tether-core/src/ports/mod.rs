//! Ports - the seams between the engine and the outside world.
//!
//! - `Store`: durable source of truth for outstanding tasks
//! - `Executor`: performs the side effect of a task
//! - `Clock`: "now", swappable for tests
//! - `Metrics`: process-wide counters, timers and gauges

pub mod clock;
pub mod executor;
pub mod metrics;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::executor::{ExecContext, Executor};
pub use self::metrics::Metrics;
pub use self::store::{Store, submit};
