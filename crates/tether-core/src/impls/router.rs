//! KindRouter - dispatches each task to the handler registered for its kind.
//!
//! # Design
//! - Built during initialization (mutable), used during runtime (immutable)
//! - `HashMap<&'static str, Arc<dyn Handler<T>>>` keyed by `Task::kind()`
//! - An unrouted kind fails the attempt instead of panicking; the retry
//!   ceiling then surfaces it to operators

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::ExecError;
use crate::domain::task::Task;
use crate::ports::{ExecContext, Executor};

/// Executes one kind of task.
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: &T, ctx: &ExecContext) -> Result<(), ExecError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for kind '{0}' is already registered")]
    AlreadyRegistered(String),
}

pub struct KindRouter<T> {
    handlers: HashMap<&'static str, Arc<dyn Handler<T>>>,
}

impl<T: Task> KindRouter<T> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<H: Handler<T> + 'static>(
        &mut self,
        kind: &'static str,
        handler: H,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(kind) {
            return Err(RegistryError::AlreadyRegistered(kind.to_string()));
        }
        self.handlers.insert(kind, Arc::new(handler));
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Handler<T>>> {
        self.handlers.get(kind).cloned()
    }

    pub fn registered_kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

impl<T: Task> Default for KindRouter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Task> Executor<T> for KindRouter<T> {
    async fn exec(&self, task: &T, ctx: &ExecContext) -> Result<(), ExecError> {
        let kind = task.kind();
        let handler = self
            .get(kind)
            .ok_or_else(|| ExecError::NoHandler(kind.to_string()))?;
        handler.handle(task, ctx).await
    }
}
