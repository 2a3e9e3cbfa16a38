//! "Already processed" records in the relational store
//!
//! The `archivos_procesados` control table records every document that went
//! through Transform+Load, unique on `(tipo_documento, identificador)`. The
//! verification checks read it (and the per-type business tables) but never
//! write; only a successful Phase 2 task upserts into it.

use super::db::{ensure_identifier, open_sqlite, open_sqlite_memory};
use super::error::Result;
use super::verification::{SingleRowCheck, TimestampCheck};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::Path;

/// Status written for successfully processed documents.
pub const PROCESSED_STATE: &str = "PROCESADO";

/// A row of the control table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ProcessedRecord {
    pub tipo_documento: String,
    pub identificador: String,
    pub nombre_archivo: String,
    pub ruc: Option<String>,
    pub timestamp_archivo: Option<i64>,
    pub estado: String,
    pub fecha_procesamiento: String,
}

/// Input for registering a processed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProcessedRecord {
    pub doc_type: String,
    pub identifier: String,
    pub file_name: String,
    pub ruc: Option<String>,
    pub timestamp: Option<i64>,
}

/// Read/upsert access to processed-document state.
#[async_trait]
pub trait ProcessedStore: Send + Sync {
    /// True iff a row whose composed key equals `identifier` has the check
    /// column set to the expected value.
    async fn single_row_exists(&self, check: &SingleRowCheck, identifier: &str) -> Result<bool>;

    /// True iff a PROCESSED record for `(doc_type, identifier)` has a stored
    /// timestamp `>= timestamp`.
    async fn processed_at_or_after(
        &self,
        check: &TimestampCheck,
        doc_type: &str,
        identifier: &str,
        timestamp: i64,
    ) -> Result<bool>;

    /// Upsert the control record; last writer wins.
    async fn record_processed(&self, record: &NewProcessedRecord) -> Result<()>;
}

/// SQLite-backed processed store.
#[derive(Clone)]
pub struct SqliteProcessedStore {
    pool: SqlitePool,
}

impl SqliteProcessedStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self::from_pool(open_sqlite(path).await?);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self> {
        let store = Self::from_pool(open_sqlite_memory().await?);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS archivos_procesados (
                tipo_documento TEXT NOT NULL,
                identificador TEXT NOT NULL,
                nombre_archivo TEXT NOT NULL,
                ruc TEXT,
                timestamp_archivo INTEGER,
                estado TEXT NOT NULL DEFAULT 'PROCESADO',
                fecha_procesamiento TEXT NOT NULL,
                UNIQUE (tipo_documento, identificador)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Look up a control record.
    pub async fn get(&self, doc_type: &str, identifier: &str) -> Result<Option<ProcessedRecord>> {
        let record = sqlx::query_as::<_, ProcessedRecord>(
            r#"
            SELECT tipo_documento, identificador, nombre_archivo, ruc,
                   timestamp_archivo, estado, fecha_procesamiento
            FROM archivos_procesados
            WHERE tipo_documento = ? AND identificador = ?
            "#,
        )
        .bind(doc_type)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }
}

#[async_trait]
impl ProcessedStore for SqliteProcessedStore {
    async fn single_row_exists(&self, check: &SingleRowCheck, identifier: &str) -> Result<bool> {
        let table = ensure_identifier(&check.table)?;
        let column = ensure_identifier(&check.check_column)?;
        for part in &check.identifier.parts {
            ensure_identifier(&part.column)?;
        }

        let sql = format!(
            "SELECT 1 FROM {} WHERE {} = ? AND {} = ? LIMIT 1",
            table,
            check.identifier.sql(),
            column
        );
        let found: Option<i64> = sqlx::query_scalar(&sql)
            .bind(identifier)
            .bind(&check.check_value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn processed_at_or_after(
        &self,
        check: &TimestampCheck,
        doc_type: &str,
        identifier: &str,
        timestamp: i64,
    ) -> Result<bool> {
        let table = ensure_identifier(&check.table)?;
        let column = ensure_identifier(&check.timestamp_column)?;

        let sql = format!(
            "SELECT 1 FROM {} WHERE tipo_documento = ? AND identificador = ? AND {} >= ? AND estado = ? LIMIT 1",
            table, column
        );
        let found: Option<i64> = sqlx::query_scalar(&sql)
            .bind(doc_type)
            .bind(identifier)
            .bind(timestamp)
            .bind(PROCESSED_STATE)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn record_processed(&self, record: &NewProcessedRecord) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO archivos_procesados
                (tipo_documento, identificador, nombre_archivo, ruc, timestamp_archivo, estado, fecha_procesamiento)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (tipo_documento, identificador) DO UPDATE SET
                nombre_archivo = excluded.nombre_archivo,
                fecha_procesamiento = excluded.fecha_procesamiento,
                timestamp_archivo = excluded.timestamp_archivo
            "#,
        )
        .bind(&record.doc_type)
        .bind(&record.identifier)
        .bind(&record.file_name)
        .bind(&record.ruc)
        .bind(record.timestamp)
        .bind(PROCESSED_STATE)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
