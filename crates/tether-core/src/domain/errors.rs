//! Errors - error types and their operational classification.

use std::time::Duration;

use super::codec::CodecError;

/// How the Manager reacts to a Store or Manager error.
///
/// - Persistence: log it and retry on the next scan
/// - Fatal: stop scheduling (closed store, broken invariant)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Persistence,
    Fatal,
}

/// Failure of one execution attempt. Always lands the task in Failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error("{0}")]
    Failed(String),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("executor panicked: {0}")]
    Panicked(String),

    #[error("no handler registered for kind={0}")]
    NoHandler(String),
}

impl ExecError {
    pub fn failed(message: impl Into<String>) -> Self {
        ExecError::Failed(message.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store is closed")]
    Closed,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store backend: {0}")]
    Backend(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Closed => ErrorKind::Fatal,
            _ => ErrorKind::Persistence,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("invalid manager config: {0}")]
    InvalidConfig(String),

    #[error("store closed; manager stopped scheduling")]
    StoreClosed,

    #[error("store read failed: {0}")]
    Store(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("manager loop failed to join: {0}")]
    Join(String),
}

impl ManagerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ManagerError::Store(_) => ErrorKind::Persistence,
            _ => ErrorKind::Fatal,
        }
    }
}

impl From<StoreError> for ManagerError {
    fn from(e: StoreError) -> Self {
        match e.kind() {
            ErrorKind::Fatal => ManagerError::StoreClosed,
            ErrorKind::Persistence => ManagerError::Store(e.to_string()),
        }
    }
}
