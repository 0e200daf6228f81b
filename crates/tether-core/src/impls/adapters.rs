//! Executor adapters.
//!
//! - `GuardedExecutor`: enforces the attempt deadline and turns panics into
//!   `ExecError::Panicked`, so nothing escapes a worker
//! - `FnExecutor`: an async closure as an executor

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::domain::errors::ExecError;
use crate::domain::task::Task;
use crate::ports::{ExecContext, Executor};

pub struct GuardedExecutor<T> {
    inner: Arc<dyn Executor<T>>,
}

impl<T: Task> GuardedExecutor<T> {
    pub fn new(inner: Arc<dyn Executor<T>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: Task> Executor<T> for GuardedExecutor<T> {
    async fn exec(&self, task: &T, ctx: &ExecContext) -> Result<(), ExecError> {
        let budget = ctx.remaining();
        let attempt = AssertUnwindSafe(self.inner.exec(task, ctx)).catch_unwind();
        match tokio::time::timeout_at(ctx.deadline, attempt).await {
            Err(_elapsed) => Err(ExecError::Timeout(budget)),
            Ok(Err(panic)) => Err(ExecError::Panicked(panic_message(panic.as_ref()))),
            Ok(Ok(result)) => result,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Wraps `Fn(T) -> impl Future<Output = Result<(), ExecError>>`.
///
/// # Example
/// ```ignore
/// let exec = FnExecutor(|task: WritebackTask| async move {
///     upload(&task.digest).await.map_err(|e| ExecError::failed(e.to_string()))
/// });
/// ```
pub struct FnExecutor<F>(pub F);

#[async_trait]
impl<T, F, Fut> Executor<T> for FnExecutor<F>
where
    T: Task,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ExecError>> + Send,
{
    async fn exec(&self, task: &T, _ctx: &ExecContext) -> Result<(), ExecError> {
        (self.0)(task.clone()).await
    }
}
