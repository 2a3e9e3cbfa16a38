//! Duplicate detection per document type
//!
//! Each document type may carry one verification strategy. The dispatcher
//! evaluates it against the processed-records store and answers whether the
//! document was already handled. Every failure path answers "not a duplicate":
//! reprocessing is recoverable, silently dropping a document is not.

use super::classifier::Classification;
use super::keys::processing_identifier;
use super::processed::ProcessedStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// Key expressions
// ============================================================================

/// One column of a composed key and the classification field that feeds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPart {
    pub column: String,
    pub field: String,
}

/// A composed key: columns concatenated with a literal separator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExpression {
    pub parts: Vec<KeyPart>,
    pub separator: String,
}

impl KeyExpression {
    /// Build from `(column, field)` pairs.
    pub fn concat(parts: &[(&str, &str)], separator: &str) -> Self {
        Self {
            parts: parts
                .iter()
                .map(|(column, field)| KeyPart {
                    column: column.to_string(),
                    field: field.to_string(),
                })
                .collect(),
            separator: separator.to_string(),
        }
    }

    /// SQL form, e.g. `numero_serie || '-' || numero_correlativo`.
    pub fn sql(&self) -> String {
        let separator = format!(" || '{}' || ", self.separator.replace('\'', "''"));
        self.parts
            .iter()
            .map(|p| p.column.as_str())
            .collect::<Vec<_>>()
            .join(&separator)
    }

    /// Evaluate against extracted fields.
    ///
    /// A part whose field was not extracted makes the whole key empty, which
    /// never matches a stored row.
    pub fn evaluate(&self, classification: &Classification) -> String {
        let mut values = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            match classification.field(&part.field) {
                Some(value) => values.push(value),
                None => return String::new(),
            }
        }
        values.join(&self.separator)
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// A single stored row marks the document as done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleRowCheck {
    pub table: String,
    pub identifier: KeyExpression,
    pub check_column: String,
    pub check_value: String,
}

/// Dedup happens per row at load time; this layer never reports a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowByRowCheck {
    pub table: String,
    pub identifier_columns: Vec<String>,
}

/// A processed version with an equal or newer embedded timestamp wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampCheck {
    pub table: String,
    pub timestamp_column: String,
    /// Classification field holding the embedded timestamp
    pub timestamp_field: String,
}

/// Verification method for one document type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum VerificationStrategy {
    SingleRow(SingleRowCheck),
    RowByRow(RowByRowCheck),
    Timestamp(TimestampCheck),
}

/// Immutable doc-type → strategy table.
#[derive(Debug, Clone, Default)]
pub struct VerificationTable {
    strategies: HashMap<String, VerificationStrategy>,
}

impl VerificationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, used while assembling the table at start-up.
    pub fn with(mut self, doc_type: &str, strategy: VerificationStrategy) -> Self {
        self.strategies.insert(doc_type.to_string(), strategy);
        self
    }

    pub fn get(&self, doc_type: &str) -> Option<&VerificationStrategy> {
        self.strategies.get(doc_type)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Strategies for the SUNAT document types.
    pub fn sunat_default() -> Self {
        let voucher_key = KeyExpression::concat(
            &[("numero_serie", "serie"), ("numero_correlativo", "correlativo")],
            "-",
        );
        let processed_timestamp = |field: &str| {
            VerificationStrategy::Timestamp(TimestampCheck {
                table: "archivos_procesados".to_string(),
                timestamp_column: "timestamp_archivo".to_string(),
                timestamp_field: field.to_string(),
            })
        };

        Self::new()
            .with(
                "factura_xml",
                VerificationStrategy::SingleRow(SingleRowCheck {
                    table: "facturas".to_string(),
                    identifier: voucher_key.clone(),
                    check_column: "observaciones".to_string(),
                    check_value: "PROCESADO".to_string(),
                }),
            )
            .with(
                "boleta_xml",
                VerificationStrategy::SingleRow(SingleRowCheck {
                    table: "boletas".to_string(),
                    identifier: voucher_key,
                    check_column: "estado".to_string(),
                    check_value: "COMPLETADO".to_string(),
                }),
            )
            .with(
                "guia_remision_xml",
                VerificationStrategy::RowByRow(RowByRowCheck {
                    table: "guias_remision".to_string(),
                    identifier_columns: vec!["numero_guia".to_string(), "item".to_string()],
                }),
            )
            .with("reporte_planilla_zip", processed_timestamp("fecha"))
            .with("declaraciones_pagos", processed_timestamp("timestamp"))
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Runs the configured strategy for a classified document.
#[derive(Clone)]
pub struct VerificationDispatcher {
    table: Arc<VerificationTable>,
    store: Arc<dyn ProcessedStore>,
}

impl VerificationDispatcher {
    pub fn new(table: Arc<VerificationTable>, store: Arc<dyn ProcessedStore>) -> Self {
        Self { table, store }
    }

    pub fn table(&self) -> &VerificationTable {
        &self.table
    }

    /// Whether the document was already processed. Read-only.
    pub async fn is_duplicate(&self, file_name: &str, classification: &Classification) -> bool {
        let Some(doc_type) = classification.doc_type() else {
            return false;
        };
        let Some(strategy) = self.table.get(doc_type) else {
            return false;
        };

        match strategy {
            VerificationStrategy::SingleRow(check) => {
                let identifier = check.identifier.evaluate(classification);
                if identifier.is_empty() {
                    debug!(file = %file_name, "Empty identifier, treating as new");
                    return false;
                }
                match self.store.single_row_exists(check, &identifier).await {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(file = %file_name, table = %check.table, "Single-row check failed, treating as new: {}", e);
                        false
                    }
                }
            }
            VerificationStrategy::RowByRow(_) => false,
            VerificationStrategy::Timestamp(check) => {
                let timestamp = match classification
                    .field(&check.timestamp_field)
                    .and_then(|raw| raw.parse::<i64>().ok())
                {
                    Some(ts) => ts,
                    None => {
                        warn!(file = %file_name, field = %check.timestamp_field, "No usable timestamp, treating as new");
                        return false;
                    }
                };
                let identifier = processing_identifier(file_name, classification);
                match self
                    .store
                    .processed_at_or_after(check, doc_type, &identifier, timestamp)
                    .await
                {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(file = %file_name, table = %check.table, "Timestamp check failed, treating as new: {}", e);
                        false
                    }
                }
            }
        }
    }
}
