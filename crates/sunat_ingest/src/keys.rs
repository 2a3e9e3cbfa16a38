//! Archival keys and processing identifiers derived from classification fields

use super::classifier::Classification;

/// Object-store key for a verbatim-archived document: `<key_field value>/<file_name>`.
///
/// Returns `None` when the key field was not extracted; such a document can
/// never be keyed for dedup.
pub fn archival_key(file_name: &str, classification: &Classification, key_field: &str) -> Option<String> {
    classification
        .field(key_field)
        .filter(|value| !value.is_empty())
        .map(|value| format!("{}/{}", value, file_name))
}

/// Archive key for a transformed document. Falls back to the bare file name
/// when the key field is missing.
pub fn processed_archive_key(file_name: &str, classification: &Classification, key_field: &str) -> String {
    archival_key(file_name, classification, key_field).unwrap_or_else(|| file_name.to_string())
}

/// Logical identifier of a document across re-deliveries.
///
/// Two files with the same identifier describe the same document; the
/// timestamp check compares versions within one identifier.
pub fn processing_identifier(file_name: &str, classification: &Classification) -> String {
    let field = |name: &str| classification.field(name).unwrap_or("");
    let ruc = field("ruc");

    let voucher_code = match classification.doc_type() {
        Some("factura_xml") => Some("01"),
        Some("boleta_xml") => Some("03"),
        Some("credito_xml") => Some("07"),
        Some("debito_xml") => Some("08"),
        Some("recibo_xml") => Some("RHE"),
        Some("guia_remision_xml") => Some("09"),
        _ => None,
    };
    if let Some(code) = voucher_code {
        return format!("{}_{}_{}_{}", ruc, code, field("serie"), field("correlativo"));
    }

    match classification.doc_type() {
        Some("reporte_planilla_zip") => format!("{}_PLANILLA_{}", ruc, field("codigo")),
        Some("declaraciones_pagos") => format!("{}_DECLARACIONES", ruc),
        _ => file_name.to_string(),
    }
}
