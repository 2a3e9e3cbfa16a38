//! Error types for the ingestion pipeline

use std::io;
use thiserror::Error;

/// Ingestion error type
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Pattern error: {0}")]
    Pattern(String),

    #[error("Unsupported container format: {0}")]
    UnsupportedContainer(String),

    #[error("Entry '{entry}' not found in container '{container}'")]
    EntryNotFound { container: String, entry: String },

    #[error("Source file not found: {0}")]
    SourceFileNotFound(String),

    #[error("Invalid provenance: {0}")]
    Provenance(String),

    #[error("Invalid archival key: {0}")]
    InvalidKey(String),

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Load error: {0}")]
    Load(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl IngestError {
    /// True when the failure came from an archive codec we cannot read.
    pub fn is_unsupported_container(&self) -> bool {
        matches!(
            self,
            IngestError::UnsupportedContainer(_)
                | IngestError::Archive(zip::result::ZipError::UnsupportedArchive(_))
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, IngestError>;
