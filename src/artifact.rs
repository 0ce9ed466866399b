use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::{FleetError, Result};

/// Persists worker source under one directory per worker UID.
#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Write `contents` to `<uid>/<entry>`, replacing any previous file.
    async fn write_artifact(&self, uid: &str, entry: &str, contents: &[u8]) -> Result<()>;

    /// Recursively remove the worker's directory. A missing directory is fine.
    async fn delete_artifact(&self, uid: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FsCodeStore {
    root: PathBuf,
}

impl FsCodeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_dir(&self, uid: &str) -> PathBuf {
        self.root.join(uid)
    }

    pub fn artifact_path(&self, uid: &str, entry: &str) -> Result<PathBuf> {
        if !is_plain_segment(uid) || !is_relative_entry(entry) {
            return Err(FleetError::InvalidEntry {
                uid: uid.to_string(),
                entry: entry.to_string(),
            });
        }
        Ok(self.artifact_dir(uid).join(entry))
    }
}

#[async_trait]
impl CodeStore for FsCodeStore {
    async fn write_artifact(&self, uid: &str, entry: &str, contents: &[u8]) -> Result<()> {
        let path = self.artifact_path(uid, entry)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FleetError::storage(parent, e))?;
        }
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| FleetError::storage(&path, e))?;
        tracing::debug!(uid, path = %path.display(), bytes = contents.len(), "Artifact written");
        Ok(())
    }

    async fn delete_artifact(&self, uid: &str) -> Result<()> {
        if !is_plain_segment(uid) {
            return Err(FleetError::InvalidEntry {
                uid: uid.to_string(),
                entry: String::new(),
            });
        }
        let dir = self.artifact_dir(uid);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::debug!(uid, path = %dir.display(), "Artifact removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FleetError::storage(dir, e)),
        }
    }
}

/// A single normal path component, so a UID can never address outside the root.
fn is_plain_segment(s: &str) -> bool {
    let mut components = Path::new(s).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn is_relative_entry(entry: &str) -> bool {
    !entry.is_empty()
        && Path::new(entry)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
