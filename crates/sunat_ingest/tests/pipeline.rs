//! End-to-end pipeline tests: a temp directory as the source, a temp directory
//! as the object store, in-memory SQLite for queue and processed records, and
//! a scripted loader standing in for Transform+Load.

use async_trait::async_trait;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sunat_ingest::{
    Collaborators, IngestError, LoadReport, LocalDirSource, LocalObjectStore, ObjectStore,
    Orchestrator, OrchestratorSettings, PatternRegistry, ProcessedStore, ProvenanceLocator,
    Result, RunOptions, RunReporter, RunSummary, SqliteProcessedStore, Staging, TaskQueue,
    TaskStatus, TransformInput, TransformLoad, VerificationTable,
};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

const FICHA: &str = "reporteec_ficharuc_20123456789_20240101120000.pdf";
const FACTURA: &str = "FACTURAAB12-34520123456789.zip";

/// Records every input; fails for file names in `fail_on`.
#[derive(Default)]
struct ScriptedLoader {
    fail_on: Vec<String>,
    seen: Mutex<Vec<(String, Vec<u8>)>>,
    /// Time spent inside each `run`
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl TransformLoad for ScriptedLoader {
    async fn run(&self, input: &TransformInput) -> Result<LoadReport> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let bytes = std::fs::read(&input.path)?;
        self.seen
            .lock()
            .unwrap()
            .push((input.file_name.clone(), bytes));
        if self.fail_on.contains(&input.file_name) {
            return Err(IngestError::Transform(format!("bad data in {}", input.file_name)));
        }
        Ok(LoadReport {
            inserted: 1,
            failed: 0,
        })
    }
}

#[derive(Default)]
struct CapturingReporter {
    summaries: Mutex<Vec<RunSummary>>,
}

#[async_trait]
impl RunReporter for CapturingReporter {
    async fn report(&self, summary: &RunSummary) -> Result<()> {
        self.summaries.lock().unwrap().push(summary.clone());
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    inbox: PathBuf,
    archive: PathBuf,
    staging: PathBuf,
    queue: Arc<TaskQueue>,
    processed: Arc<SqliteProcessedStore>,
    loader: Arc<ScriptedLoader>,
    reporter: Arc<CapturingReporter>,
    orchestrator: Orchestrator,
}

impl Harness {
    async fn new() -> Self {
        Self::with(ScriptedLoader::default(), OrchestratorSettings::default()).await
    }

    async fn with(loader: ScriptedLoader, settings: OrchestratorSettings) -> Self {
        let dir = TempDir::new().unwrap();
        let inbox = dir.path().join("inbox");
        let archive = dir.path().join("archive");
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(&inbox).unwrap();

        let queue = Arc::new(TaskQueue::open_in_memory().await.unwrap());
        let processed = Arc::new(SqliteProcessedStore::open_in_memory().await.unwrap());
        let loader = Arc::new(loader);
        let reporter = Arc::new(CapturingReporter::default());

        let services = Collaborators {
            source: Arc::new(LocalDirSource::new(&inbox).unwrap()),
            objects: Arc::new(LocalObjectStore::new(&archive).unwrap()),
            processed: processed.clone(),
            loader: loader.clone(),
            reporter: reporter.clone(),
        };
        let orchestrator = Orchestrator::new(
            Arc::new(PatternRegistry::sunat_default().unwrap()),
            Arc::new(VerificationTable::sunat_default()),
            queue.clone(),
            Staging::new(&staging).unwrap(),
            services,
            settings,
        );

        Self {
            _dir: dir,
            inbox,
            archive,
            staging,
            queue,
            processed,
            loader,
            reporter,
            orchestrator,
        }
    }

    fn drop_file(&self, name: &str, data: &[u8]) {
        std::fs::write(self.inbox.join(name), data).unwrap();
    }

    fn drop_zip(&self, name: &str, entries: &[(&str, &[u8])]) {
        let path = self.inbox.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (entry, data) in entries {
            writer.start_file(*entry, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    fn archived(&self, key: &str) -> Option<Vec<u8>> {
        std::fs::read(self.archive.join(key)).ok()
    }

    fn archived_count(&self) -> usize {
        walkdir::WalkDir::new(&self.archive)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    async fn scan(&self, options: &RunOptions) -> RunSummary {
        let mut summary = RunSummary::default();
        self.orchestrator.scan(options, &mut summary).await.unwrap();
        summary
    }
}

fn staging_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
}

#[tokio::test]
async fn test_ficha_ruc_is_archived_under_ruc() {
    let h = Harness::new().await;
    h.drop_file(FICHA, b"%PDF-ficha");

    let summary = h.orchestrator.run(&RunOptions::default()).await.unwrap();

    assert_eq!(summary.archived, 1);
    assert_eq!(summary.enqueued, 0);
    assert_eq!(
        h.archived(&format!("20123456789/{}", FICHA)).as_deref(),
        Some(&b"%PDF-ficha"[..])
    );
    assert!(h.queue.list(None, None).await.unwrap().is_empty());
    assert!(staging_is_empty(&h.staging));
    assert_eq!(h.reporter.summaries.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_factura_is_enqueued_with_direct_provenance() {
    let h = Harness::new().await;
    h.drop_file(FACTURA, b"PK");

    let summary = h.scan(&RunOptions::default()).await;
    assert_eq!(summary.enqueued, 1);

    let pending = h.queue.dequeue_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].file_name, FACTURA);
    assert_eq!(pending[0].status, TaskStatus::Pending);
    assert_eq!(pending[0].locator().unwrap(), ProvenanceLocator::direct(FACTURA));
    assert_eq!(h.archived_count(), 0);
}

#[tokio::test]
async fn test_scan_twice_is_idempotent() {
    let h = Harness::new().await;
    h.drop_file(FICHA, b"%PDF");
    h.drop_file(FACTURA, b"PK");
    h.drop_file("notas.txt", b"hola");

    let first = h.scan(&RunOptions::default()).await;
    assert_eq!((first.archived, first.enqueued, first.unrecognized), (1, 1, 1));

    let second = h.scan(&RunOptions::default()).await;
    assert_eq!((second.archived, second.enqueued), (0, 0));
    assert_eq!(second.duplicates, 1);

    assert_eq!(h.queue.stats().await.unwrap().pending, 1);
    assert_eq!(h.archived_count(), 1);
}

#[tokio::test]
async fn test_failing_task_does_not_affect_siblings() {
    let names = [
        "FACTURAAB12-120123456789.zip",
        "FACTURAAB12-220123456789.zip",
        "FACTURAAB12-320123456789.zip",
    ];
    let loader = ScriptedLoader {
        fail_on: vec![names[1].to_string()],
        ..Default::default()
    };
    let h = Harness::with(loader, OrchestratorSettings::default()).await;
    for name in names {
        h.drop_file(name, name.as_bytes());
    }

    let summary = h.orchestrator.run(&RunOptions::default()).await.unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.errored, 1);
    assert_eq!(summary.errors[0].0, names[1]);

    let tasks = h.queue.list(None, None).await.unwrap();
    assert_eq!(tasks.len(), 3);
    for task in &tasks {
        if task.file_name == names[1] {
            assert_eq!(task.status, TaskStatus::Error);
            assert!(!task.error_message.as_deref().unwrap_or("").is_empty());
        } else {
            assert_eq!(task.status, TaskStatus::Processed);
            assert!(task.error_message.is_none());
        }
    }

    // Successful tasks are archived and recorded; the failed one is not.
    assert!(h.archived(&format!("20123456789/{}", names[0])).is_some());
    assert!(h.archived(&format!("20123456789/{}", names[1])).is_none());
    assert!(h
        .processed
        .get("factura_xml", "20123456789_01_AB12_1")
        .await
        .unwrap()
        .is_some());
    assert!(h
        .processed
        .get("factura_xml", "20123456789_01_AB12_2")
        .await
        .unwrap()
        .is_none());
    assert!(staging_is_empty(&h.staging));
}

#[tokio::test]
async fn test_phase2_respects_concurrency_limit() {
    let loader = ScriptedLoader {
        delay: Some(Duration::from_millis(50)),
        ..Default::default()
    };
    let settings = OrchestratorSettings {
        max_concurrent_tasks: 2,
        ..Default::default()
    };
    let h = Harness::with(loader, settings).await;
    for n in 1..=6 {
        let name = format!("FACTURAAB12-{}20123456789.zip", n);
        h.drop_file(&name, name.as_bytes());
    }

    let summary = h.orchestrator.run(&RunOptions::default()).await.unwrap();

    assert_eq!(summary.enqueued, 6);
    assert_eq!(summary.processed, 6);
    let peak = h.loader.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak in-flight loads was {}", peak);
    assert_eq!(h.queue.stats().await.unwrap().processed, 6);
    assert!(h.queue.list(Some(TaskStatus::Pending), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_containers_sharing_a_name_are_kept_apart() {
    let h = Harness::new().await;
    let first = "reporteec_ficharuc_20111111111_20240101120000.pdf";
    let second = "reporteec_ficharuc_20222222222_20240101120000.pdf";
    h.drop_zip("a/lote.zip", &[(first, b"%PDF-a")]);
    h.drop_zip("b/lote.zip", &[(second, b"%PDF-b")]);

    let summary = h.scan(&RunOptions::default()).await;

    assert_eq!(summary.containers_expanded, 2);
    assert_eq!(summary.archived, 2);
    assert_eq!(summary.skipped, 0);
    assert_eq!(
        h.archived(&format!("20111111111/{}", first)).as_deref(),
        Some(&b"%PDF-a"[..])
    );
    assert_eq!(
        h.archived(&format!("20222222222/{}", second)).as_deref(),
        Some(&b"%PDF-b"[..])
    );
    assert!(staging_is_empty(&h.staging));
}

#[tokio::test]
async fn test_generic_zip_is_expanded() {
    let h = Harness::new().await;
    let ficha_entry = format!("docs/{}", FICHA);
    h.drop_zip(
        "lote_marzo.zip",
        &[
            (ficha_entry.as_str(), b"%PDF-inner"),
            ("docs/LE2012345678920240100140100EXP2.txt", b"Ruc|Periodo\n"),
            ("docs/leeme.txt", b"junk"),
        ],
    );

    let summary = h.orchestrator.run(&RunOptions::default()).await.unwrap();
    assert_eq!(summary.containers_expanded, 1);
    assert_eq!(summary.archived, 1);
    assert_eq!(summary.enqueued, 1);
    assert_eq!(summary.processed, 1);

    assert_eq!(
        h.archived(&format!("20123456789/{}", FICHA)).as_deref(),
        Some(&b"%PDF-inner"[..])
    );

    let tasks = h.queue.list(None, None).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(
        tasks[0].locator().unwrap(),
        ProvenanceLocator::inside("lote_marzo.zip", "docs/LE2012345678920240100140100EXP2.txt")
    );
    assert_eq!(tasks[0].status, TaskStatus::Processed);

    let seen = h.loader.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "LE2012345678920240100140100EXP2.txt");
    assert_eq!(seen[0].1, b"Ruc|Periodo\n");
}

#[tokio::test]
async fn test_nested_structured_archive_is_processed_whole() {
    let h = Harness::new().await;
    h.drop_zip(
        "envio.zip",
        &[("LE2012345678920240100140100EXP2.zip", b"inner-archive-bytes")],
    );

    let summary = h.orchestrator.run(&RunOptions::default()).await.unwrap();
    assert_eq!(summary.processed, 1);

    let tasks = h.queue.list(None, None).await.unwrap();
    assert_eq!(
        tasks[0].locator().unwrap(),
        ProvenanceLocator::nested("envio.zip", "LE2012345678920240100140100EXP2.zip")
    );
    assert_eq!(h.loader.seen.lock().unwrap()[0].1, b"inner-archive-bytes");
    assert!(h
        .archived("20123456789/LE2012345678920240100140100EXP2.zip")
        .is_some());
}

#[tokio::test]
async fn test_structured_zip_is_not_expanded() {
    let h = Harness::new().await;
    h.drop_zip(FACTURA, &[(FICHA, b"%PDF")]);

    let summary = h.scan(&RunOptions::default()).await;
    assert_eq!(summary.containers_expanded, 0);
    assert_eq!(summary.enqueued, 1);
    assert_eq!(h.archived_count(), 0);
}

#[tokio::test]
async fn test_unsupported_container_is_skipped() {
    let h = Harness::new().await;
    h.drop_file("lote.rar", b"Rar!");
    h.drop_file(FICHA, b"%PDF");

    let summary = h.orchestrator.run(&RunOptions::default()).await.unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.archived, 1);
}

#[tokio::test]
async fn test_archive_only_never_enqueues() {
    let h = Harness::new().await;
    h.drop_file(FICHA, b"%PDF");
    h.drop_file(FACTURA, b"PK");

    let options = RunOptions {
        archive_only: true,
        ..Default::default()
    };
    let summary = h.orchestrator.run(&options).await.unwrap();
    assert_eq!(summary.archived, 1);
    assert_eq!(summary.enqueued, 0);
    assert!(h.queue.list(None, None).await.unwrap().is_empty());
    assert!(h.loader.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_doc_type_filter() {
    let h = Harness::new().await;
    h.drop_file(FICHA, b"%PDF");
    h.drop_file(FACTURA, b"PK");
    h.drop_file("LE2012345678920240100140100EXP2.txt", b"Ruc\n");

    let options = RunOptions {
        only_doc_type: Some("sire_ventas".to_string()),
        ..Default::default()
    };
    let summary = h.orchestrator.run(&options).await.unwrap();
    assert_eq!(summary.archived, 0);
    assert_eq!(summary.processed, 1);

    let tasks = h.queue.list(None, None).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].file_name, "LE2012345678920240100140100EXP2.txt");
}

#[tokio::test]
async fn test_newer_processed_declaracion_is_duplicate() {
    let h = Harness::new().await;
    h.processed
        .record_processed(&sunat_ingest::NewProcessedRecord {
            doc_type: "declaraciones_pagos".to_string(),
            identifier: "20123456789_DECLARACIONES".to_string(),
            file_name: "DetalleDeclaraciones_20123456789_20240301120000.xlsx".to_string(),
            ruc: Some("20123456789".to_string()),
            timestamp: Some(20240301120000),
        })
        .await
        .unwrap();

    let older = "DetalleDeclaraciones_20123456789_20240101120000.xlsx";
    let newer = "DetalleDeclaraciones_20123456789_20240401120000.xlsx";
    h.drop_file(older, b"old");
    h.drop_file(newer, b"new");

    let summary = h.scan(&RunOptions::default()).await;
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.enqueued, 1);

    // The duplicate was never archived, so its original is archived now.
    assert_eq!(
        h.archived(&format!("20123456789/{}", older)).as_deref(),
        Some(&b"old"[..])
    );
    let pending = h.queue.dequeue_pending().await.unwrap();
    assert_eq!(pending[0].file_name, newer);
}

#[tokio::test]
async fn test_processed_record_carries_timestamp() {
    let h = Harness::new().await;
    let name = "DetalleDeclaraciones_20123456789_20240101120000.xlsx";
    h.drop_file(name, b"xlsx");

    let summary = h.orchestrator.run(&RunOptions::default()).await.unwrap();
    assert_eq!(summary.processed, 1);

    let record = h
        .processed
        .get("declaraciones_pagos", "20123456789_DECLARACIONES")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.timestamp_archivo, Some(20240101120000));
    assert_eq!(record.nombre_archivo, name);

    // A second scan now sees it as processed and archived.
    let again = h.scan(&RunOptions::default()).await;
    assert_eq!((again.duplicates, again.enqueued, again.archived), (1, 0, 0));
}

#[tokio::test]
async fn test_delete_source_duplicates() {
    let settings = OrchestratorSettings {
        delete_source_duplicates: true,
        ..Default::default()
    };
    let h = Harness::with(ScriptedLoader::default(), settings).await;
    h.drop_file(FICHA, b"%PDF");

    h.scan(&RunOptions::default()).await;
    assert!(h.inbox.join(FICHA).exists());

    let second = h.scan(&RunOptions::default()).await;
    assert_eq!(second.duplicates, 1);
    assert!(!h.inbox.join(FICHA).exists());
}

#[tokio::test]
async fn test_missing_key_field_is_skipped() {
    let h = Harness::new().await;
    h.drop_file(
        "constancia_20240101120000_12345678901234567890_1234567890123_123456789.pdf",
        b"%PDF",
    );

    let summary = h.scan(&RunOptions::default()).await;
    assert_eq!(summary.skipped, 1);
    assert_eq!(h.archived_count(), 0);
}

#[tokio::test]
async fn test_object_store_shared_view() {
    // The harness archive directory is what LocalObjectStore reads.
    let h = Harness::new().await;
    h.drop_file(FICHA, b"%PDF");
    h.scan(&RunOptions::default()).await;

    let store = LocalObjectStore::new(&h.archive).unwrap();
    assert!(store
        .exists(&format!("20123456789/{}", FICHA))
        .await
        .unwrap());
}
