//! Concrete task kinds produced by the artifact agent.
//!
//! `DeferredTask` is the closed set the agent persists. Stores and executors
//! only see it through the `Task` trait.

use serde::{Deserialize, Serialize};

use super::task::{Task, TaskKey};

/// Write a locally cached blob back to the remote storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritebackTask {
    pub namespace: String,
    pub digest: String,
}

impl WritebackTask {
    pub const KIND: &'static str = "writeback";

    pub fn new(namespace: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            digest: digest.into(),
        }
    }
}

impl Task for WritebackTask {
    fn key(&self) -> TaskKey {
        TaskKey::from_parts(Self::KIND, &[self.namespace.as_str(), self.digest.as_str()])
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn describe(&self) -> String {
        format!("write back {} in {}", self.digest, self.namespace)
    }
}

/// Replicate a tag (and the blobs it depends on) to another cluster.
///
/// Keyed by destination and tag: a newer digest for the same tag replaces the
/// pending replication instead of queueing a second one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationTask {
    pub tag: String,
    pub digest: String,
    pub destination: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ReplicationTask {
    pub const KIND: &'static str = "replicate";

    pub fn new(
        tag: impl Into<String>,
        digest: impl Into<String>,
        destination: impl Into<String>,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            tag: tag.into(),
            digest: digest.into(),
            destination: destination.into(),
            dependencies,
        }
    }
}

impl Task for ReplicationTask {
    fn key(&self) -> TaskKey {
        TaskKey::from_parts(Self::KIND, &[self.destination.as_str(), self.tag.as_str()])
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn describe(&self) -> String {
        format!(
            "replicate {} ({}, {} deps) to {}",
            self.tag,
            self.digest,
            self.dependencies.len(),
            self.destination
        )
    }
}

/// Tagged union over every kind the agent defers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeferredTask {
    Writeback(WritebackTask),
    #[serde(rename = "replicate")]
    Replication(ReplicationTask),
}

impl Task for DeferredTask {
    fn key(&self) -> TaskKey {
        match self {
            DeferredTask::Writeback(t) => t.key(),
            DeferredTask::Replication(t) => t.key(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            DeferredTask::Writeback(t) => t.kind(),
            DeferredTask::Replication(t) => t.kind(),
        }
    }

    fn describe(&self) -> String {
        match self {
            DeferredTask::Writeback(t) => t.describe(),
            DeferredTask::Replication(t) => t.describe(),
        }
    }
}

impl From<WritebackTask> for DeferredTask {
    fn from(t: WritebackTask) -> Self {
        DeferredTask::Writeback(t)
    }
}

impl From<ReplicationTask> for DeferredTask {
    fn from(t: ReplicationTask) -> Self {
        DeferredTask::Replication(t)
    }
}
