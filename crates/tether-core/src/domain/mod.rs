//! Domain model: tasks, records, retry policy, decisions and errors.
//!
//! Pure values and functions; no I/O.

pub mod codec;
pub mod decision;
pub mod errors;
pub mod ids;
pub mod kinds;
pub mod record;
pub mod retry;
pub mod task;

pub use self::codec::{CodecError, PayloadCodec};
pub use self::decision::{Decision, DefaultDecider};
pub use self::errors::{ErrorKind, ExecError, ManagerError, StoreError};
pub use self::ids::AttemptId;
pub use self::kinds::{DeferredTask, ReplicationTask, WritebackTask};
pub use self::record::{TaskRecord, TaskStatus};
pub use self::retry::RetryPolicy;
pub use self::task::{Task, TaskKey};
