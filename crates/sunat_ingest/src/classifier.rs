//! File classification based on name patterns
//!
//! Matches a file name against the registry and returns the document type,
//! the extracted fields and the transform flag. Pure: no I/O.

use super::registry::PatternRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of classifying a single file name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Matched document type, `None` when no rule matched
    pub doc_type: Option<String>,
    /// Capture-group values keyed by field name
    pub fields: BTreeMap<String, String>,
    /// Whether the document must go through Transform+Load
    pub needs_transform: bool,
}

impl Classification {
    /// Classification for a name that matched nothing.
    pub fn unrecognized() -> Self {
        Self::default()
    }

    pub fn is_recognized(&self) -> bool {
        self.doc_type.is_some()
    }

    pub fn doc_type(&self) -> Option<&str> {
        self.doc_type.as_deref()
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Classifier over a shared, immutable rule table.
#[derive(Debug, Clone)]
pub struct Classifier {
    registry: Arc<PatternRegistry>,
}

impl Classifier {
    pub fn new(registry: Arc<PatternRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    /// Classify a bare file name (no directory components).
    ///
    /// Returns the first matching rule in registry order.
    pub fn classify(&self, file_name: &str) -> Classification {
        self.registry
            .rules()
            .find_map(|rule| {
                rule.captures(file_name).map(|fields| Classification {
                    doc_type: Some(rule.doc_type().to_string()),
                    fields,
                    needs_transform: rule.needs_transform(),
                })
            })
            .unwrap_or_else(Classification::unrecognized)
    }
}

/// Last path component of an archive entry or listing path.
pub fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
