//! Local staging area for downloaded and extracted files
//!
//! Every staged file gets its own directory, `<root>/<key>/<file_name>`, where
//! the key is a task id or a hash of where the bytes came from. Two files with
//! the same name never share a path. The directory is removed when the
//! `StagedFile` is dropped.

use super::classifier::base_name;
use super::error::{IngestError, Result};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Unique directory name for one staged artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingKey(String);

impl StagingKey {
    pub fn task(task_id: i64) -> Self {
        Self(format!("task-{}", task_id))
    }

    /// Key derived from the identity of the bytes (source id, entry path, ...).
    pub fn hashed(parts: &[&str]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update(&[0]);
        }
        let hex = hasher.finalize().to_hex();
        Self(format!("src-{}", &hex.as_str()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct Staging {
    root: PathBuf,
}

impl Staging {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve `<root>/<key>/<file_name>`. Nothing is written yet.
    ///
    /// A leftover directory from an interrupted run is cleared first.
    pub fn reserve(&self, key: &StagingKey, file_name: &str) -> Result<StagedFile> {
        let name = base_name(file_name);
        if name.is_empty() || name == "." || name == ".." {
            return Err(IngestError::InvalidState(format!(
                "cannot stage file named {:?}",
                file_name
            )));
        }

        let dir = self.root.join(key.as_str());
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        Ok(StagedFile {
            path: dir.join(name),
            dir,
        })
    }
}

/// A staged file; its directory is deleted on drop.
#[derive(Debug)]
pub struct StagedFile {
    dir: PathBuf,
    path: PathBuf,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), "Failed to clean staging directory: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_same_name_different_keys() {
        let dir = TempDir::new().unwrap();
        let staging = Staging::new(dir.path().join("staging")).unwrap();

        let a = staging.reserve(&StagingKey::task(1), "factura.zip").unwrap();
        let b = staging.reserve(&StagingKey::task(2), "factura.zip").unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().ends_with("task-1/factura.zip"));
    }

    #[test]
    fn test_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let staging = Staging::new(dir.path()).unwrap();

        let staged = staging
            .reserve(&StagingKey::hashed(&["lote.zip", "a/b.xml"]), "a/b.xml")
            .unwrap();
        assert_eq!(staged.path().file_name().unwrap(), "b.xml");
        std::fs::write(staged.path(), b"x").unwrap();
        let parent = staged.path().parent().unwrap().to_path_buf();
        assert!(parent.exists());

        drop(staged);
        assert!(!parent.exists());
    }

    #[test]
    fn test_hashed_key_is_stable() {
        assert_eq!(StagingKey::hashed(&["a", "b"]), StagingKey::hashed(&["a", "b"]));
        assert_ne!(StagingKey::hashed(&["ab"]), StagingKey::hashed(&["a", "b"]));
    }

    #[test]
    fn test_rejects_empty_name() {
        let dir = TempDir::new().unwrap();
        let staging = Staging::new(dir.path()).unwrap();
        assert!(staging.reserve(&StagingKey::task(1), "dir/").is_err());
    }
}
