//! Document source: the remote drop folder the pipeline scans

use super::error::{IngestError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// A file in the source listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    /// Source-specific id used to fetch or delete the file
    pub id: String,
    /// Bare file name
    pub name: String,
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Every file currently in the source.
    async fn list(&self) -> Result<Vec<SourceFile>>;

    /// Copy a file's bytes to `dest`.
    async fn download(&self, id: &str, dest: &Path) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Re-resolve a file by name from a fresh listing.
    async fn find_by_name(&self, name: &str) -> Result<Option<SourceFile>> {
        Ok(self.list().await?.into_iter().find(|f| f.name == name))
    }
}

/// A local directory (or single file) standing in for the remote store.
///
/// Ids are paths relative to the root, with `/` separators.
#[derive(Debug, Clone)]
pub struct LocalDirSource {
    root: PathBuf,
    only: Option<String>,
}

impl LocalDirSource {
    /// Source over a directory, or over one file when `path` is a file.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.is_dir() {
            return Ok(Self { root: path, only: None });
        }
        if path.is_file() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| IngestError::SourceFileNotFound(path.display().to_string()))?;
            let root = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            return Ok(Self {
                root,
                only: Some(name),
            });
        }
        Err(IngestError::SourceFileNotFound(path.display().to_string()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, id: &str) -> Result<PathBuf> {
        let relative = Path::new(id);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || id.is_empty() {
            return Err(IngestError::SourceFileNotFound(id.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentSource for LocalDirSource {
    async fn list(&self) -> Result<Vec<SourceFile>> {
        let root = self.root.clone();
        let only = self.only.clone();

        let files = tokio::task::spawn_blocking(move || -> Result<Vec<SourceFile>> {
            let max_depth = if only.is_some() { 1 } else { usize::MAX };
            let mut files = Vec::new();
            for entry in WalkDir::new(&root).max_depth(max_depth).sort_by_file_name() {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if only.as_deref().map_or(false, |o| o != name) {
                    continue;
                }
                let id = entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap_or(entry.path())
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push(SourceFile { id, name });
            }
            Ok(files)
        })
        .await
        .map_err(|e| IngestError::InvalidState(format!("listing task failed: {}", e)))??;

        info!(root = %self.root.display(), count = files.len(), "Source listed");
        Ok(files)
    }

    async fn download(&self, id: &str, dest: &Path) -> Result<()> {
        let path = self.resolve(id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(IngestError::SourceFileNotFound(id.to_string()));
        }
        tokio::fs::copy(&path, dest).await?;
        debug!(id = %id, dest = %dest.display(), "Downloaded");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.resolve(id)?;
        tokio::fs::remove_file(&path).await?;
        info!(id = %id, "Deleted from source");
        Ok(())
    }
}
