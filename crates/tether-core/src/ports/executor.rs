//! Executor port - performs the side effect of a task.

use async_trait::async_trait;
use tokio::time::Instant;

use crate::domain::errors::ExecError;
use crate::domain::ids::AttemptId;
use crate::domain::task::Task;

/// Per-attempt context handed to an executor.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub attempt_id: AttemptId,

    /// 1-based number of this attempt.
    pub attempt: u32,

    /// The attempt is abandoned at this instant; I/O should not outlive it.
    pub deadline: Instant,
}

impl ExecContext {
    pub fn remaining(&self) -> std::time::Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Executes tasks.
///
/// - Never touches the Store; it only reports success or failure.
/// - No retry logic: scheduling and backoff belong to the Manager.
/// - Must be safe to call concurrently from several workers.
#[async_trait]
pub trait Executor<T: Task>: Send + Sync {
    async fn exec(&self, task: &T, ctx: &ExecContext) -> Result<(), ExecError>;
}
