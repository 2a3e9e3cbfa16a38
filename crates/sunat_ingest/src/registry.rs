//! Pattern registry
//!
//! An ordered table of file-name rules. Each rule names a document type, a
//! regex over the whole file name, the names of its capture groups and whether
//! matching documents need transformation before they are stored.
//!
//! Ordering is part of the contract: NEED-TRANSFORM rules are always evaluated
//! before NO-TRANSFORM rules, and within each group the first rule added wins.
//! The registry is built once at start-up and shared read-only.

use super::error::{IngestError, Result};
use regex::{Regex, RegexBuilder};
use std::collections::{BTreeMap, HashSet};

// ============================================================================
// Default SUNAT rule table
// ============================================================================

/// (doc_type, pattern, capture-group field names) for documents archived verbatim.
const NO_TRANSFORM_RULES: &[(&str, &str, &[&str])] = &[
    ("ficha_ruc", r"reporteec_ficharuc_(\d{11})_(\d{14})\.(pdf)", &["ruc", "timestamp", "ext"]),
    (
        "ingreso_recaudacion",
        r"ridetrac_(\d{11})_(\d{13})_(\d{14})_(\d{9})\.(pdf)",
        &["ruc", "resolucion", "timestamp", "id", "ext"],
    ),
    (
        "liberacion_fondos",
        r"rilf_(\d{11})_(\d{13})_(\d{14})_(\d{9})\.(pdf)",
        &["ruc", "resolucion", "timestamp", "id", "ext"],
    ),
    (
        "multa",
        r"rmgen_(\d{11})_(\d{3}-\d{3}-\d{7})_(\d{14})_(\d{9})\.(pdf)",
        &["ruc", "resolucion", "timestamp", "id", "ext"],
    ),
    (
        "notificacion",
        r"constancia_(\d{14})_(\d{20})_(\d{13})_(\d{9})\.(pdf)",
        &["timestamp", "resolucion", "constancia", "id", "ext"],
    ),
    (
        "valores",
        r"rvalores_(\d{11})_([A-Z0-9]{12,17})_(\d{14})_(\d{9})\.(pdf)",
        &["ruc", "esquela", "timestamp", "id", "ext"],
    ),
    (
        "ejecucion",
        r"recgen_(\d{11})_(\d{13})_(\d{14})_(\d{9})\.(pdf)",
        &["ruc", "resolucion", "timestamp", "id", "ext"],
    ),
    ("baja_oficio", r"bod_(\d{6})_(\d{11})_(\d{4})\.(pdf)", &["codigo", "ruc", "formulario", "ext"]),
    (
        "coactiva",
        r"rcce_(\d{11})_(\d{13})_(\d{14})_(\d{9})\.(pdf)",
        &["ruc", "resolucion", "timestamp", "id", "ext"],
    ),
    (
        "fraccionamiento",
        r"fragen_(\d{6})_(\d{11})_(\d{13})_(\d{14})_(\d{9})\.(pdf)",
        &["codigo", "ruc", "resolucion", "timestamp", "id", "ext"],
    ),
    (
        "reporte_tributario",
        r"reporteec_reportetrieeff_(\d{11})_(\d{14})\.(pdf)",
        &["ruc", "timestamp", "ext"],
    ),
    ("rentas_retenciones", r"reporteec_rentas_(\d{11})_(\d{14})\.(pdf)", &["ruc", "timestamp", "ext"]),
    ("factura_pdf", r"PDF-DOC-([A-Z0-9]{4})-?(\d{1,8})(\d{11})\.(pdf)", &["serie", "correlativo", "ruc", "ext"]),
    ("boleta_pdf", r"PDF-BOLETA([A-Z0-9]{4})-(\d{1,8})(\d{11})\.(pdf)", &["serie", "correlativo", "ruc", "ext"]),
    (
        "credito_pdf",
        r"PDF-NOTA_CREDITO([A-Z0-9]{4})_?(\d{1,8})(\d{11})\.(pdf)",
        &["serie", "correlativo", "ruc", "ext"],
    ),
    (
        "debito_pdf",
        r"PDF-NOTA_DEBITO([A-Z0-9]{4})_?(\d{1,8})(\d{11})\.(pdf)",
        &["serie", "correlativo", "ruc", "ext"],
    ),
    ("recibo_honorarios_pdf", r"RHE(\d{11})([A-Z0-9]{4})(\d{1,8})\.(pdf)", &["ruc", "serie", "correlativo", "ext"]),
    ("guia_remision_pdf", r"(\d{11})-09-([A-Z0-9]{4})-(\d{1,8})\.(pdf)", &["ruc", "serie", "correlativo", "ext"]),
];

/// (doc_type, pattern, capture-group field names) for documents that go through Transform+Load.
const NEED_TRANSFORM_RULES: &[(&str, &str, &[&str])] = &[
    ("declaraciones_pagos", r"DetalleDeclaraciones_(\d{11})_(\d{14})\.(xlsx)", &["ruc", "timestamp", "ext"]),
    ("guia_remision_xml", r"(\d{11})-09-([A-Z0-9]{4})-(\d{1,8})\.(xml)", &["ruc", "serie", "correlativo", "ext"]),
    // Structured containers: these archives are processed whole, never expanded.
    ("sire_compras", r"(\d{11})-\d{8}-\d{4,6}-propuesta\.(zip|txt)", &["ruc", "ext"]),
    ("sire_ventas", r"LE(\d{11})\d{6}1?\d+EXP2\.(zip|txt)", &["ruc", "ext"]),
    ("factura_xml", r"FACTURA([A-Z0-9]{4})-?(\d{1,8})(\d{11})\.(zip|xml)", &["serie", "correlativo", "ruc", "ext"]),
    ("boleta_xml", r"BOLETA([A-Z0-9]{4})-(\d{1,8})(\d{11})\.(zip|xml)", &["serie", "correlativo", "ruc", "ext"]),
    (
        "credito_xml",
        r"NOTA_CREDITO([A-Z0-9]{4})_?(\d{1,8})(\d{11})\.(zip|xml)",
        &["serie", "correlativo", "ruc", "ext"],
    ),
    (
        "debito_xml",
        r"NOTA_DEBITO([A-Z0-9]{4})_?(\d{1,8})(\d{11})\.(zip|xml)",
        &["serie", "correlativo", "ruc", "ext"],
    ),
    ("recibo_xml", r"RHE(\d{11})(\d{1,8})\.(xml)", &["ruc", "correlativo", "ext"]),
    ("reporte_planilla_zip", r"(\d{11})_([A-Z]{3})+_(\d{8})\.(zip)", &["ruc", "codigo", "fecha", "ext"]),
];

// ============================================================================
// Rules
// ============================================================================

/// A compiled file-name rule.
#[derive(Debug, Clone)]
pub struct PatternRule {
    doc_type: String,
    pattern: String,
    regex: Regex,
    field_names: Vec<String>,
    needs_transform: bool,
}

impl PatternRule {
    /// Compile a rule. The pattern is anchored to the whole name and matched
    /// case-insensitively; the field list must name every capture group.
    pub fn new(
        doc_type: impl Into<String>,
        pattern: &str,
        field_names: &[&str],
        needs_transform: bool,
    ) -> Result<Self> {
        let doc_type = doc_type.into();
        let regex = RegexBuilder::new(&format!("^(?:{})$", pattern))
            .case_insensitive(true)
            .build()
            .map_err(|e| IngestError::Pattern(format!("{}: {}", doc_type, e)))?;

        let groups = regex.captures_len() - 1;
        if groups != field_names.len() {
            return Err(IngestError::Pattern(format!(
                "{}: pattern has {} capture groups but {} field names",
                doc_type,
                groups,
                field_names.len()
            )));
        }

        Ok(Self {
            doc_type,
            pattern: pattern.to_string(),
            regex,
            field_names: field_names.iter().map(|f| f.to_string()).collect(),
            needs_transform,
        })
    }

    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    pub fn needs_transform(&self) -> bool {
        self.needs_transform
    }

    /// Match a file name, returning the named capture values on success.
    pub fn captures(&self, file_name: &str) -> Option<BTreeMap<String, String>> {
        let caps = self.regex.captures(file_name)?;
        let fields = self
            .field_names
            .iter()
            .enumerate()
            .filter_map(|(idx, name)| {
                caps.get(idx + 1)
                    .map(|m| (name.clone(), m.as_str().to_string()))
            })
            .collect();
        Some(fields)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Ordered, immutable rule table.
#[derive(Debug, Clone)]
pub struct PatternRegistry {
    rules: Vec<PatternRule>,
}

impl PatternRegistry {
    /// Build a registry from rules in insertion order.
    ///
    /// NEED-TRANSFORM rules are moved ahead of NO-TRANSFORM rules; relative
    /// order inside each group is preserved. Duplicate doc types are rejected.
    pub fn new(rules: Vec<PatternRule>) -> Result<Self> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.doc_type.clone()) {
                return Err(IngestError::Pattern(format!(
                    "duplicate rule for document type '{}'",
                    rule.doc_type
                )));
            }
        }

        let (mut ordered, no_transform): (Vec<_>, Vec<_>) =
            rules.into_iter().partition(|r| r.needs_transform);
        ordered.extend(no_transform);

        Ok(Self { rules: ordered })
    }

    /// The SUNAT rule table.
    pub fn sunat_default() -> Result<Self> {
        let need = NEED_TRANSFORM_RULES
            .iter()
            .map(|(doc_type, pattern, fields)| PatternRule::new(*doc_type, pattern, fields, true));
        let no = NO_TRANSFORM_RULES
            .iter()
            .map(|(doc_type, pattern, fields)| PatternRule::new(*doc_type, pattern, fields, false));
        let rules = need.chain(no).collect::<Result<Vec<_>>>()?;
        Self::new(rules)
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = &PatternRule> {
        self.rules.iter()
    }

    pub fn get(&self, doc_type: &str) -> Option<&PatternRule> {
        self.rules.iter().find(|r| r.doc_type == doc_type)
    }

    pub fn contains(&self, doc_type: &str) -> bool {
        self.get(doc_type).is_some()
    }

    /// Document types in evaluation order.
    pub fn doc_types(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.doc_type.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
