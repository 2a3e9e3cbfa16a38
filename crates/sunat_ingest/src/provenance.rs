//! Where a task's bytes come from
//!
//! Stored in the task queue as a tagged JSON record. The old colon-delimited
//! strings (`compressed:<zip>:<entry>`, `container:<zip>:<inner>`, bare id)
//! are still readable so an existing queue keeps draining.

use super::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const LEGACY_COMPRESSED: &str = "compressed:";
const LEGACY_CONTAINER: &str = "container:";

/// How to obtain a file's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProvenanceLocator {
    /// Fetch straight from the source.
    Direct { remote_id: String },
    /// Extract `entry` from the named archive in the source listing.
    InsideContainer { container: String, entry: String },
    /// Extract the structured archive `inner` from the generic archive
    /// `outer`; the inner archive is then handled as its own artifact.
    InsideNestedContainer { outer: String, inner: String },
}

impl ProvenanceLocator {
    pub fn direct(remote_id: impl Into<String>) -> Self {
        Self::Direct {
            remote_id: remote_id.into(),
        }
    }

    pub fn inside(container: impl Into<String>, entry: impl Into<String>) -> Self {
        Self::InsideContainer {
            container: container.into(),
            entry: entry.into(),
        }
    }

    pub fn nested(outer: impl Into<String>, inner: impl Into<String>) -> Self {
        Self::InsideNestedContainer {
            outer: outer.into(),
            inner: inner.into(),
        }
    }

    /// Serialized form stored in the task queue.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored locator, accepting both the JSON and the legacy form.
    pub fn decode(raw: &str) -> Result<Self> {
        match serde_json::from_str(raw) {
            Ok(locator) => Ok(locator),
            Err(_) if !raw.trim_start().starts_with('{') => Self::parse_legacy(raw),
            Err(e) => Err(IngestError::Provenance(format!("{}: {}", raw, e))),
        }
    }

    /// Parse the colon-delimited form. The first colon after the prefix
    /// separates container from entry, so a container name containing a colon
    /// is misread; that ambiguity is why the JSON form replaced it.
    pub fn parse_legacy(raw: &str) -> Result<Self> {
        let split = |rest: &str| {
            rest.split_once(':')
                .filter(|(container, entry)| !container.is_empty() && !entry.is_empty())
                .map(|(container, entry)| (container.to_string(), entry.to_string()))
                .ok_or_else(|| IngestError::Provenance(format!("malformed locator: {}", raw)))
        };

        if let Some(rest) = raw.strip_prefix(LEGACY_COMPRESSED) {
            let (container, entry) = split(rest)?;
            Ok(Self::InsideContainer { container, entry })
        } else if let Some(rest) = raw.strip_prefix(LEGACY_CONTAINER) {
            let (outer, inner) = split(rest)?;
            Ok(Self::InsideNestedContainer { outer, inner })
        } else if raw.is_empty() {
            Err(IngestError::Provenance("empty locator".to_string()))
        } else {
            Ok(Self::direct(raw))
        }
    }

    /// Name of the archive in the source listing, if any.
    pub fn container_name(&self) -> Option<&str> {
        match self {
            Self::Direct { .. } => None,
            Self::InsideContainer { container, .. } => Some(container),
            Self::InsideNestedContainer { outer, .. } => Some(outer),
        }
    }

    /// Path of the entry inside the container, if any.
    pub fn entry_path(&self) -> Option<&str> {
        match self {
            Self::Direct { .. } => None,
            Self::InsideContainer { entry, .. } => Some(entry),
            Self::InsideNestedContainer { inner, .. } => Some(inner),
        }
    }
}

impl fmt::Display for ProvenanceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { remote_id } => write!(f, "direct({})", remote_id),
            Self::InsideContainer { container, entry } => write!(f, "{} → {}", container, entry),
            Self::InsideNestedContainer { outer, inner } => write!(f, "{} ⇒ {}", outer, inner),
        }
    }
}
