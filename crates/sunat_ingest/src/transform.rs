//! Transform+Load collaborator
//!
//! The orchestrator hands each NEED-TRANSFORM document to a [`TransformLoad`]
//! implementation. [`DelimitedTableLoader`] covers the SIRE registers: pipe
//! delimited `.txt` tables, alone or inside a zip, Latin-1 encoded, with a
//! header row. Headers are renamed to table columns and each row is inserted
//! on its own, so a rejected row (constraint violation, duplicate) is counted
//! and the rest of the batch still loads.

use super::classifier::Classification;
use super::db::ensure_identifier;
use super::error::{IngestError, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// A document ready for Transform+Load.
#[derive(Debug, Clone)]
pub struct TransformInput {
    pub task_id: i64,
    pub file_name: String,
    pub classification: Classification,
    /// Staged copy of the document
    pub path: PathBuf,
}

/// Row counts from one load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub inserted: u64,
    pub failed: u64,
}

#[async_trait]
pub trait TransformLoad: Send + Sync {
    /// Transform the document and load it. An `Err` fails the whole task;
    /// per-row rejections are reported in [`LoadReport::failed`].
    async fn run(&self, input: &TransformInput) -> Result<LoadReport>;
}

/// Target table for one document type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapping {
    pub table: String,
    /// `(source header, column)` pairs; unmapped headers are ignored
    pub columns: Vec<(String, String)>,
    /// Columns forming the row identity, enforced by a UNIQUE constraint
    pub unique: Vec<String>,
}

impl TableMapping {
    pub fn new(table: &str, columns: &[(&str, &str)], unique: &[&str]) -> Self {
        Self {
            table: table.to_string(),
            columns: columns
                .iter()
                .map(|(h, c)| (h.to_string(), c.to_string()))
                .collect(),
            unique: unique.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn validate(&self) -> Result<()> {
        ensure_identifier(&self.table)?;
        for (_, column) in &self.columns {
            ensure_identifier(column)?;
        }
        for column in &self.unique {
            ensure_identifier(column)?;
            if !self.columns.iter().any(|(_, c)| c == column) {
                return Err(IngestError::Config(format!(
                    "unique column {} of {} is not mapped",
                    column, self.table
                )));
            }
        }
        Ok(())
    }

    fn create_sql(&self) -> String {
        let mut columns: Vec<String> = self
            .columns
            .iter()
            .map(|(_, c)| format!("{} TEXT", c))
            .collect();
        columns.push("archivo_origen TEXT NOT NULL".to_string());
        if !self.unique.is_empty() {
            columns.push(format!("UNIQUE ({})", self.unique.join(", ")));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table,
            columns.join(", ")
        )
    }
}

const SIRE_COMMON_COLUMNS: &[(&str, &str)] = &[
    ("Periodo", "periodo_tributario"),
    ("CAR SUNAT", "observaciones"),
    ("Fecha de emisión", "fecha_emision"),
    ("Fecha Vcto/Pago", "fecha_vencimiento"),
    ("Tipo CP/Doc.", "tipo_comprobante"),
    ("Serie del CDP", "numero_serie"),
    ("Nro CP o Doc. Nro Inicial (Rango)", "numero_correlativo"),
    ("Tipo Doc Identidad", "tipo_documento"),
    ("Nro Doc Identidad", "numero_documento"),
    ("ISC", "isc"),
    ("ICBPER", "icbp"),
    ("Moneda", "tipo_moneda"),
    ("Tipo CP Modificado", "tipo_comprobante_modificado"),
    ("Serie CP Modificado", "numero_serie_modificado"),
    ("Nro CP Modificado", "numero_correlativo_modificado"),
];

const SIRE_IDENTITY: &[&str] = &["ruc", "tipo_comprobante", "numero_serie", "numero_correlativo"];

/// Loads pipe-delimited tables into SQLite.
pub struct DelimitedTableLoader {
    pool: SqlitePool,
    mappings: HashMap<String, TableMapping>,
}

impl DelimitedTableLoader {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            mappings: HashMap::new(),
        }
    }

    pub fn with_mapping(mut self, doc_type: &str, mapping: TableMapping) -> Result<Self> {
        mapping.validate()?;
        self.mappings.insert(doc_type.to_string(), mapping);
        Ok(self)
    }

    /// Mappings for the SIRE sales and purchases registers.
    pub fn sunat_default(pool: SqlitePool) -> Result<Self> {
        let mut ventas = vec![("Ruc", "ruc"), ("Nro Final (Rango)", "numero_final")];
        ventas.extend_from_slice(SIRE_COMMON_COLUMNS);
        let mut compras = vec![("RUC", "ruc"), ("Detracción", "tasa_detraccion")];
        compras.extend_from_slice(SIRE_COMMON_COLUMNS);

        Self::new(pool)
            .with_mapping("sire_ventas", TableMapping::new("sire_ventas", &ventas, SIRE_IDENTITY))?
            .with_mapping("sire_compras", TableMapping::new("sire_compras", &compras, SIRE_IDENTITY))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// One parsed table: header plus data rows.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DelimitedTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// Latin-1 maps byte-for-byte onto the first 256 code points.
fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn parse_table(text: &str) -> Option<DelimitedTable> {
    let mut lines = text
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty());
    let header = lines
        .next()?
        .split('|')
        .map(|h| h.trim().to_string())
        .collect();
    let rows = lines
        .map(|l| l.split('|').map(|v| v.trim().to_string()).collect())
        .collect();
    Some(DelimitedTable { header, rows })
}

/// Read every `.txt` table from a plain file or a zip.
fn read_tables(path: &Path) -> Result<Vec<DelimitedTable>> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let mut texts = Vec::new();
    if name.ends_with(".zip") {
        let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() || !entry.name().to_ascii_lowercase().ends_with(".txt") {
                continue;
            }
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            texts.push((entry.name().to_string(), decode_latin1(&bytes)));
        }
    } else if name.ends_with(".txt") {
        texts.push((name.clone(), decode_latin1(&std::fs::read(path)?)));
    } else {
        return Err(IngestError::Transform(format!(
            "no delimited table in {}",
            path.display()
        )));
    }

    let mut tables = Vec::new();
    for (entry, text) in texts {
        match parse_table(&text) {
            Some(table) => tables.push(table),
            None => warn!(entry = %entry, "Empty table skipped"),
        }
    }
    Ok(tables)
}

#[async_trait]
impl TransformLoad for DelimitedTableLoader {
    async fn run(&self, input: &TransformInput) -> Result<LoadReport> {
        let doc_type = input.classification.doc_type().unwrap_or_default();
        let mapping = self.mappings.get(doc_type).ok_or_else(|| {
            IngestError::Transform(format!("no loader configured for doc type '{}'", doc_type))
        })?;

        let path = input.path.clone();
        let tables = tokio::task::spawn_blocking(move || read_tables(&path))
            .await
            .map_err(|e| IngestError::Transform(format!("extraction task failed: {}", e)))??;

        if tables.is_empty() {
            warn!(task_id = input.task_id, file = %input.file_name, "No data extracted");
            return Ok(LoadReport::default());
        }

        sqlx::query(&mapping.create_sql())
            .execute(&self.pool)
            .await
            .map_err(|e| IngestError::Load(e.to_string()))?;

        let mut columns: Vec<&str> = mapping.columns.iter().map(|(_, c)| c.as_str()).collect();
        columns.push("archivo_origen");
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            mapping.table,
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        );

        let mut report = LoadReport::default();
        let mut tx = self.pool.begin().await.map_err(|e| IngestError::Load(e.to_string()))?;

        for table in &tables {
            // Column position of each mapped header in this table, if present.
            let positions: Vec<Option<usize>> = mapping
                .columns
                .iter()
                .map(|(header, _)| table.header.iter().position(|h| h == header))
                .collect();

            for (index, row) in table.rows.iter().enumerate() {
                let mut query = sqlx::query(&insert);
                for position in &positions {
                    let value = position
                        .and_then(|p| row.get(p))
                        .filter(|v| !v.is_empty() && v.as_str() != "-")
                        .cloned();
                    query = query.bind(value);
                }
                query = query.bind(&input.file_name);

                // A failed INSERT only rolls back its own statement.
                match query.execute(&mut *tx).await {
                    Ok(_) => report.inserted += 1,
                    Err(e) => {
                        report.failed += 1;
                        debug!(row = index, table = %mapping.table, "Row rejected: {}", e);
                    }
                }
            }
        }

        tx.commit().await.map_err(|e| IngestError::Load(e.to_string()))?;

        info!(
            task_id = input.task_id,
            file = %input.file_name,
            table = %mapping.table,
            inserted = report.inserted,
            failed = report.failed,
            "Load complete"
        );
        Ok(report)
    }
}
