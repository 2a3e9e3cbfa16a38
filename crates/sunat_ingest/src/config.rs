//! Pipeline configuration

use super::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings for one pipeline deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Task queue database
    #[serde(default = "default_queue_db_path")]
    pub queue_db_path: PathBuf,

    /// Database holding the processed-records table and the check tables
    #[serde(default = "default_processed_db_path")]
    pub processed_db_path: PathBuf,

    /// Database the delimited-table loader writes into
    #[serde(default = "default_load_db_path")]
    pub load_db_path: PathBuf,

    /// Directory standing in for the remote drop folder
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// Object store root
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,

    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Upper bound on Phase 2 tasks running at once
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Remove a source file once it is known to be archived already
    #[serde(default)]
    pub delete_source_duplicates: bool,

    /// Classification field that prefixes archival keys
    #[serde(default = "default_archive_key_field")]
    pub archive_key_field: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// `$SUNAT_HOME`, or `~/.sunat_etl`.
pub fn default_home() -> PathBuf {
    if let Ok(home) = std::env::var("SUNAT_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .map(|h| h.join(".sunat_etl"))
        .unwrap_or_else(|| PathBuf::from(".sunat_etl"))
}

fn default_queue_db_path() -> PathBuf {
    default_home().join("queue.sqlite3")
}

fn default_processed_db_path() -> PathBuf {
    default_home().join("processed.sqlite3")
}

fn default_load_db_path() -> PathBuf {
    default_home().join("load.sqlite3")
}

fn default_source_dir() -> PathBuf {
    default_home().join("inbox")
}

fn default_archive_dir() -> PathBuf {
    default_home().join("archive")
}

fn default_staging_dir() -> PathBuf {
    default_home().join("staging")
}

fn default_max_concurrent_tasks() -> usize {
    4
}

fn default_archive_key_field() -> String {
    "ruc".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_db_path: default_queue_db_path(),
            processed_db_path: default_processed_db_path(),
            load_db_path: default_load_db_path(),
            source_dir: default_source_dir(),
            archive_dir: default_archive_dir(),
            staging_dir: default_staging_dir(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            delete_source_duplicates: false,
            archive_key_field: default_archive_key_field(),
            log_level: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig =
            toml::from_str(&content).map_err(|e| IngestError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| IngestError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(IngestError::Config(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.archive_key_field.trim().is_empty() {
            return Err(IngestError::Config("archive_key_field is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_concurrent_tasks, 4);
        assert_eq!(config.archive_key_field, "ruc");
        assert!(!config.delete_source_duplicates);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            source_dir = "/data/inbox"
            max_concurrent_tasks = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.source_dir, PathBuf::from("/data/inbox"));
        assert_eq!(config.max_concurrent_tasks, 8);
        assert_eq!(config.archive_key_field, "ruc");
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("config.toml");
        let config = PipelineConfig {
            archive_dir: dir.path().join("archive"),
            delete_source_duplicates: true,
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_concurrent_tasks = 0\n").unwrap();
        assert!(matches!(PipelineConfig::load(&path), Err(IngestError::Config(_))));

        std::fs::write(&path, "max_concurrent_tasks = \"many\"\n").unwrap();
        assert!(matches!(PipelineConfig::load(&path), Err(IngestError::Config(_))));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.max_concurrent_tasks, 4);
    }
}
