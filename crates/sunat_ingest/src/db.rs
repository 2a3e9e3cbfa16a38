//! SQLite pool helpers shared by the queue, processed-records and load stores.

use super::error::{IngestError, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Open or create a SQLite database file.
pub async fn open_sqlite(path: impl AsRef<Path>) -> Result<SqlitePool> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let url = format!("sqlite:{}?mode=rwc", path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    info!(path = %path.display(), "Database opened");
    Ok(pool)
}

/// Private in-memory database. One connection, never recycled, so every query
/// sees the same database.
pub async fn open_sqlite_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}

/// Reject anything that is not a plain SQL identifier. Table and column names
/// are interpolated into statements, so they must never carry syntax.
pub fn ensure_identifier(name: &str) -> Result<&str> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(name)
    } else {
        Err(IngestError::Config(format!("invalid SQL identifier: {:?}", name)))
    }
}
