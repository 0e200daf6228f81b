//! Filesystem write-back handlers.
//!
//! - writeback: `<cache_dir>/<digest>` → `<backend_dir>/<namespace>/<digest>`
//! - replicate: `<cache_dir>/<digest>` → `<remotes_dir>/<destination>/<tag>`,
//!   only once every dependency digest is present in the cache
//!
//! Files are written to a temp name next to the target and renamed into
//! place, so a repeated attempt overwrites rather than corrupts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tether_core::Task;
use tether_core::domain::{DeferredTask, ExecError, ReplicationTask, WritebackTask};
use tether_core::impls::Handler;
use tether_core::ports::ExecContext;

use crate::config::WritebackSection;

#[derive(Debug, Clone)]
pub struct BlobDirs {
    pub cache: PathBuf,
    pub backend: PathBuf,
    pub remotes: PathBuf,
}

impl From<&WritebackSection> for BlobDirs {
    fn from(s: &WritebackSection) -> Self {
        Self {
            cache: s.cache_dir.clone(),
            backend: s.backend_dir.clone(),
            remotes: s.remotes_dir.clone(),
        }
    }
}

impl BlobDirs {
    fn cached(&self, digest: &str) -> Result<PathBuf, ExecError> {
        Ok(self.cache.join(segment("digest", digest)?))
    }
}

pub struct WritebackHandler {
    dirs: Arc<BlobDirs>,
}

impl WritebackHandler {
    pub fn new(dirs: Arc<BlobDirs>) -> Self {
        Self { dirs }
    }

    async fn write_back(&self, task: &WritebackTask, ctx: &ExecContext) -> Result<(), ExecError> {
        let src = self.dirs.cached(&task.digest)?;
        let dst = self
            .dirs
            .backend
            .join(segment("namespace", &task.namespace)?)
            .join(segment("digest", &task.digest)?);
        publish(&src, &dst, ctx).await?;
        tracing::debug!(digest = %task.digest, namespace = %task.namespace, "blob written back");
        Ok(())
    }
}

#[async_trait]
impl Handler<DeferredTask> for WritebackHandler {
    async fn handle(&self, task: &DeferredTask, ctx: &ExecContext) -> Result<(), ExecError> {
        match task {
            DeferredTask::Writeback(t) => self.write_back(t, ctx).await,
            other => Err(misrouted(WritebackTask::KIND, other)),
        }
    }
}

pub struct ReplicationHandler {
    dirs: Arc<BlobDirs>,
}

impl ReplicationHandler {
    pub fn new(dirs: Arc<BlobDirs>) -> Self {
        Self { dirs }
    }

    async fn replicate(&self, task: &ReplicationTask, ctx: &ExecContext) -> Result<(), ExecError> {
        for dep in &task.dependencies {
            let path = self.dirs.cached(dep)?;
            let present = tokio::fs::try_exists(&path)
                .await
                .map_err(|e| io_error("stat dependency", &path, e))?;
            if !present {
                return Err(ExecError::failed(format!("dependency {dep} not in cache yet")));
            }
        }

        let src = self.dirs.cached(&task.digest)?;
        let dst = self
            .dirs
            .remotes
            .join(segment("destination", &task.destination)?)
            .join(segment("tag", &task.tag)?);
        publish(&src, &dst, ctx).await?;
        tracing::debug!(tag = %task.tag, destination = %task.destination, "tag replicated");
        Ok(())
    }
}

#[async_trait]
impl Handler<DeferredTask> for ReplicationHandler {
    async fn handle(&self, task: &DeferredTask, ctx: &ExecContext) -> Result<(), ExecError> {
        match task {
            DeferredTask::Replication(t) => self.replicate(t, ctx).await,
            other => Err(misrouted(ReplicationTask::KIND, other)),
        }
    }
}

fn misrouted(expected: &str, task: &DeferredTask) -> ExecError {
    ExecError::failed(format!("{expected} handler got a {} task", task.kind()))
}

/// A single path component; anything that could escape its parent is refused.
fn segment<'a>(what: &str, value: &'a str) -> Result<&'a str, ExecError> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(ExecError::failed(format!("invalid {what} {value:?}")));
    }
    Ok(value)
}

async fn publish(src: &Path, dst: &Path, ctx: &ExecContext) -> Result<(), ExecError> {
    let (Some(parent), Some(name)) = (dst.parent(), dst.file_name()) else {
        return Err(ExecError::failed(format!("invalid target {}", dst.display())));
    };
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| io_error("create", parent, e))?;

    let prefix = format!("{}.attempt-", name.to_string_lossy());
    sweep_temp_files(parent, &prefix).await;
    let tmp = parent.join(format!("{}.{}.tmp", name.to_string_lossy(), ctx.attempt_id));

    if let Err(e) = tokio::fs::copy(src, &tmp).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_error("copy", src, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, dst).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_error("rename", dst, e));
    }
    Ok(())
}

/// Remove temp files left by earlier attempts on the same target, e.g. one
/// abandoned at its deadline while its copy was still running.
async fn sweep_temp_files(dir: &Path, prefix: &str) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if file_name.starts_with(prefix) && file_name.ends_with(".tmp") {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                tracing::debug!(path = %entry.path().display(), error = %e, "stale temp file not removed");
            }
        }
    }
}

fn io_error(op: &str, path: &Path, e: std::io::Error) -> ExecError {
    ExecError::failed(format!("{op} {}: {e}", path.display()))
}
