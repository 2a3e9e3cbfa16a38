//! Archive container expansion
//!
//! A generic archive pulled from the source is opened, every entry is
//! classified by its base name, and recognized entries come back with a
//! provenance locator pointing inside the archive. A structured NEED-TRANSFORM
//! archive found inside is surfaced as a nested container and not opened:
//! its contents belong to the transform step.
//!
//! Only zip is readable. Other archive extensions are recognized so callers
//! can warn and move on instead of treating them as unknown files.

use super::classifier::{base_name, Classification, Classifier};
use super::error::{IngestError, Result};
use super::provenance::ProvenanceLocator;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use tracing::{debug, info};
use zip::result::ZipError;
use zip::ZipArchive;

/// Archive format, detected from the file extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerFormat {
    Zip,
    /// A known archive extension we cannot open
    Unsupported(String),
}

impl ContainerFormat {
    /// Detect from a file name. `None` means "not an archive".
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            return Some(Self::Zip);
        }
        [".rar", ".7z", ".tar", ".tar.gz", ".tgz", ".gz"]
            .iter()
            .find(|ext| lower.ends_with(*ext))
            .map(|ext| Self::Unsupported(ext.trim_start_matches('.').to_string()))
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Zip)
    }
}

/// True if the name carries an archive extension, supported or not.
pub fn is_archive_name(name: &str) -> bool {
    ContainerFormat::from_name(name).is_some()
}

/// One recognized entry found inside a container.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredEntry {
    /// Full path of the entry inside the archive
    pub internal_path: String,
    /// Base name, the name the entry is classified and archived under
    pub file_name: String,
    pub classification: Classification,
    pub provenance: ProvenanceLocator,
}

/// Opens containers and classifies their entries.
#[derive(Debug, Clone)]
pub struct ContainerExpander {
    classifier: Classifier,
}

impl ContainerExpander {
    pub fn new(classifier: Classifier) -> Self {
        Self { classifier }
    }

    /// List and classify the entries of a staged container.
    ///
    /// `container_name` is the name the container has in the source listing;
    /// it is what the returned locators refer to. Directories and entries that
    /// match no rule are dropped. Blocking; run it off the async runtime.
    pub fn expand(&self, container_name: &str, path: &Path) -> Result<Vec<DiscoveredEntry>> {
        match ContainerFormat::from_name(container_name) {
            Some(ContainerFormat::Zip) => {}
            Some(ContainerFormat::Unsupported(ext)) => {
                return Err(IngestError::UnsupportedContainer(format!(
                    "{} ({})",
                    container_name, ext
                )))
            }
            None => {
                return Err(IngestError::UnsupportedContainer(format!(
                    "{} (not an archive)",
                    container_name
                )))
            }
        }

        let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
        let mut entries = Vec::new();
        let mut skipped = 0usize;

        for i in 0..archive.len() {
            // Raw access: only the header is needed, never the data.
            let entry = archive.by_index_raw(i)?;
            if entry.is_dir() {
                continue;
            }
            let internal_path = entry.name().to_string();
            let file_name = base_name(&internal_path).to_string();
            let classification = self.classifier.classify(&file_name);

            if !classification.is_recognized() {
                debug!(container = %container_name, entry = %internal_path, "Unrecognized entry, dropped");
                skipped += 1;
                continue;
            }

            let provenance = if classification.needs_transform && is_archive_name(&file_name) {
                ProvenanceLocator::nested(container_name, &internal_path)
            } else {
                ProvenanceLocator::inside(container_name, &internal_path)
            };

            entries.push(DiscoveredEntry {
                internal_path,
                file_name,
                classification,
                provenance,
            });
        }

        info!(
            container = %container_name,
            found = entries.len(),
            skipped,
            "Container expanded"
        );
        Ok(entries)
    }
}

/// Copy one entry of a staged zip out to `dest`.
pub fn extract_entry(container_path: &Path, internal_path: &str, dest: &Path) -> Result<u64> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(container_path)?))?;
    let mut entry = archive.by_name(internal_path).map_err(|e| match e {
        ZipError::FileNotFound => IngestError::EntryNotFound {
            container: container_path.display().to_string(),
            entry: internal_path.to_string(),
        },
        other => IngestError::Archive(other),
    })?;

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = File::create(dest)?;
    let written = io::copy(&mut entry, &mut out)?;
    Ok(written)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::registry::PatternRegistry;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    /// Write a zip with the given `(path, contents)` entries.
    pub(crate) fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, SimpleFileOptions::default()).unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    fn expander() -> ContainerExpander {
        ContainerExpander::new(Classifier::new(Arc::new(
            PatternRegistry::sunat_default().unwrap(),
        )))
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(ContainerFormat::from_name("a.ZIP"), Some(ContainerFormat::Zip));
        assert_eq!(
            ContainerFormat::from_name("a.rar"),
            Some(ContainerFormat::Unsupported("rar".into()))
        );
        assert_eq!(
            ContainerFormat::from_name("a.tar.gz"),
            Some(ContainerFormat::Unsupported("tar.gz".into()))
        );
        assert_eq!(ContainerFormat::from_name("a.pdf"), None);
        assert!(is_archive_name("lote.7z"));
    }

    #[test]
    fn test_one_known_one_junk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lote.zip");
        write_zip(
            &path,
            &[
                ("docs/", b""),
                ("docs/20123456789-09-T001-123.xml", b"<xml/>"),
                ("docs/readme.txt", b"junk"),
            ],
        );

        let entries = expander().expand("lote.zip", &path).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.file_name, "20123456789-09-T001-123.xml");
        assert_eq!(entry.classification.doc_type(), Some("guia_remision_xml"));
        assert_eq!(
            entry.provenance,
            ProvenanceLocator::inside("lote.zip", "docs/20123456789-09-T001-123.xml")
        );
    }

    #[test]
    fn test_nested_structured_archive_not_opened() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("envio.zip");
        write_zip(
            &path,
            &[
                ("FACTURAAB12-34520123456789.zip", b"PK-not-really"),
                ("reporteec_ficharuc_20123456789_20240101120000.pdf", b"%PDF"),
            ],
        );

        let entries = expander().expand("envio.zip", &path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].provenance,
            ProvenanceLocator::nested("envio.zip", "FACTURAAB12-34520123456789.zip")
        );
        assert!(entries[0].classification.needs_transform);
        assert_eq!(
            entries[1].provenance,
            ProvenanceLocator::inside("envio.zip", "reporteec_ficharuc_20123456789_20240101120000.pdf")
        );
    }

    #[test]
    fn test_unsupported_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lote.rar");
        std::fs::write(&path, b"Rar!").unwrap();
        let err = expander().expand("lote.rar", &path).unwrap_err();
        assert!(err.is_unsupported_container());
    }

    #[test]
    fn test_corrupt_zip_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.zip");
        std::fs::write(&path, b"not a zip").unwrap();
        assert!(expander().expand("broken.zip", &path).is_err());
    }

    #[test]
    fn test_extract_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lote.zip");
        write_zip(&path, &[("a/b.xml", b"<b/>")]);

        let dest = dir.path().join("out").join("b.xml");
        assert_eq!(extract_entry(&path, "a/b.xml", &dest).unwrap(), 4);
        assert_eq!(std::fs::read(&dest).unwrap(), b"<b/>");

        let missing = extract_entry(&path, "nope.xml", &dest).unwrap_err();
        assert!(matches!(missing, IngestError::EntryNotFound { .. }));
    }
}
