//! Two-phase ingestion pipeline
//!
//! Phase 1 (scan) walks the source listing once, classifies every file,
//! unwraps generic archives, and either archives a document verbatim or
//! enqueues it for Transform+Load. Phase 2 (process) drains a snapshot of the
//! pending tasks concurrently, bounded by a semaphore; each task succeeds or
//! fails on its own. Phase 3 hands the run summary to the reporter.
//!
//! Errors for a single file or task are logged and counted at their boundary.
//! Only a failure to list the source or read the queue aborts a phase.

use super::classifier::{Classification, Classifier};
use super::config::PipelineConfig;
use super::container::{extract_entry, is_archive_name, ContainerExpander, ContainerFormat};
use super::error::{IngestError, Result};
use super::keys::{archival_key, processed_archive_key, processing_identifier};
use super::object_store::ObjectStore;
use super::processed::{NewProcessedRecord, ProcessedStore};
use super::provenance::ProvenanceLocator;
use super::queue::{EnqueueOutcome, Task, TaskQueue, TaskStatus};
use super::registry::PatternRegistry;
use super::report::{RunReporter, RunSummary};
use super::source::DocumentSource;
use super::staging::{StagedFile, Staging, StagingKey};
use super::transform::{LoadReport, TransformInput, TransformLoad};
use super::verification::{VerificationDispatcher, VerificationStrategy, VerificationTable};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// External services the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn DocumentSource>,
    pub objects: Arc<dyn ObjectStore>,
    pub processed: Arc<dyn ProcessedStore>,
    pub loader: Arc<dyn TransformLoad>,
    pub reporter: Arc<dyn RunReporter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub max_concurrent_tasks: usize,
    pub delete_source_duplicates: bool,
    pub archive_key_field: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for OrchestratorSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_concurrent_tasks: config.max_concurrent_tasks.max(1),
            delete_source_duplicates: config.delete_source_duplicates,
            archive_key_field: config.archive_key_field.clone(),
        }
    }
}

/// Per-run switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Only handle documents of this type (local batch mode)
    pub only_doc_type: Option<String>,
    /// Archive NO-TRANSFORM documents only; nothing is enqueued or processed
    pub archive_only: bool,
}

impl RunOptions {
    fn admits(&self, classification: &Classification) -> bool {
        match &self.only_doc_type {
            Some(only) => classification.doc_type() == Some(only.as_str()),
            None => true,
        }
    }
}

/// A file on its way through Phase 1 routing.
#[derive(Debug, Clone)]
struct Discovered {
    file_name: String,
    classification: Classification,
    provenance: ProvenanceLocator,
    /// Source id of the staged container this entry came from
    container_id: Option<String>,
}

/// Result of one Phase 2 task.
#[derive(Debug)]
struct TaskOutcome {
    file_name: String,
    result: std::result::Result<LoadReport, String>,
}

#[derive(Clone)]
pub struct Orchestrator {
    classifier: Classifier,
    expander: ContainerExpander,
    verifier: VerificationDispatcher,
    queue: Arc<TaskQueue>,
    staging: Staging,
    services: Collaborators,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<PatternRegistry>,
        verification: Arc<VerificationTable>,
        queue: Arc<TaskQueue>,
        staging: Staging,
        services: Collaborators,
        settings: OrchestratorSettings,
    ) -> Self {
        let classifier = Classifier::new(registry);
        Self {
            expander: ContainerExpander::new(classifier.clone()),
            verifier: VerificationDispatcher::new(verification, services.processed.clone()),
            classifier,
            queue,
            staging,
            services,
            settings,
        }
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Scan, process, report.
    pub async fn run(&self, options: &RunOptions) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        info!(archive_only = options.archive_only, only = ?options.only_doc_type, "Phase 1: scan");
        self.scan(options, &mut summary).await?;

        if options.archive_only {
            info!("Archive-only run, Phase 2 skipped");
        } else {
            info!("Phase 2: process pending tasks");
            self.process_pending(options, &mut summary).await?;
        }

        if let Err(e) = self.services.reporter.report(&summary).await {
            warn!("Reporter failed: {}", e);
        }
        Ok(summary)
    }

    // ========================================================================
    // Phase 1
    // ========================================================================

    /// Classify and route every file in the source listing.
    pub async fn scan(&self, options: &RunOptions, summary: &mut RunSummary) -> Result<()> {
        let listing = self.services.source.list().await?;

        let mut work: VecDeque<(Discovered, Option<String>)> = listing
            .into_iter()
            .map(|file| {
                let discovered = Discovered {
                    classification: self.classifier.classify(&file.name),
                    file_name: file.name,
                    provenance: ProvenanceLocator::direct(file.id.clone()),
                    container_id: None,
                };
                (discovered, Some(file.id))
            })
            .collect();

        // Expanded containers stay staged until every entry has been routed.
        // Keyed by source id: two containers may share a base name.
        let mut containers: HashMap<String, StagedFile> = HashMap::new();

        while let Some((item, source_id)) = work.pop_front() {
            summary.scanned += 1;

            if !item.classification.is_recognized() {
                match source_id {
                    Some(id) if is_archive_name(&item.file_name) => {
                        match self.expand(&item.file_name, &id).await {
                            Ok(Some((staged, entries))) => {
                                summary.containers_expanded += 1;
                                work.extend(entries.into_iter().map(|mut entry| {
                                    entry.container_id = Some(id.clone());
                                    (entry, None)
                                }));
                                containers.insert(id, staged);
                            }
                            Ok(None) => summary.skipped += 1,
                            Err(e) => {
                                error!(file = %item.file_name, "Container expansion failed: {}", e);
                                summary.skipped += 1;
                            }
                        }
                    }
                    _ => {
                        debug!(file = %item.file_name, "Unrecognized, skipped");
                        summary.unrecognized += 1;
                    }
                }
                continue;
            }

            if !options.admits(&item.classification) {
                continue;
            }

            if let Err(e) = self
                .route(&item, source_id.as_deref(), options, &containers, summary)
                .await
            {
                error!(file = %item.file_name, "Routing failed: {}", e);
                summary.skipped += 1;
            }
        }

        info!(
            scanned = summary.scanned,
            archived = summary.archived,
            enqueued = summary.enqueued,
            duplicates = summary.duplicates,
            "Phase 1 complete"
        );
        Ok(())
    }

    /// Stage a generic archive and list its recognized entries.
    ///
    /// `Ok(None)` means the format cannot be read and the container is skipped.
    async fn expand(&self, name: &str, source_id: &str) -> Result<Option<(StagedFile, Vec<Discovered>)>> {
        if let Some(format @ ContainerFormat::Unsupported(_)) = ContainerFormat::from_name(name) {
            warn!(file = %name, format = ?format, "Unsupported container format, skipped");
            return Ok(None);
        }

        let staged = self
            .staging
            .reserve(&StagingKey::hashed(&["container", source_id]), name)?;
        self.services.source.download(source_id, staged.path()).await?;

        let expander = self.expander.clone();
        let container = name.to_string();
        let path = staged.path().to_path_buf();
        let expanded = tokio::task::spawn_blocking(move || expander.expand(&container, &path))
            .await
            .map_err(|e| IngestError::InvalidState(format!("expansion task failed: {}", e)))?;

        let entries = match expanded {
            Ok(entries) => entries,
            Err(e) if e.is_unsupported_container() => {
                warn!(file = %name, "Unsupported container format, skipped: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let discovered = entries
            .into_iter()
            .map(|entry| Discovered {
                file_name: entry.file_name,
                classification: entry.classification,
                provenance: entry.provenance,
                container_id: None,
            })
            .collect();
        Ok(Some((staged, discovered)))
    }

    async fn route(
        &self,
        item: &Discovered,
        source_id: Option<&str>,
        options: &RunOptions,
        containers: &HashMap<String, StagedFile>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let key_field = self.settings.archive_key_field.as_str();

        if !item.classification.needs_transform {
            let Some(key) = archival_key(&item.file_name, &item.classification, key_field) else {
                warn!(file = %item.file_name, field = %key_field, "Key field missing, skipped");
                summary.skipped += 1;
                return Ok(());
            };

            if self.services.objects.exists(&key).await? {
                debug!(file = %item.file_name, key = %key, "Already archived");
                summary.duplicates += 1;
                if self.settings.delete_source_duplicates {
                    if let Some(id) = source_id {
                        if let Err(e) = self.services.source.delete(id).await {
                            warn!(file = %item.file_name, "Could not delete duplicate from source: {}", e);
                        }
                    }
                }
                return Ok(());
            }

            self.fetch_and_archive(item, &key, containers).await?;
            summary.archived += 1;
            return Ok(());
        }

        if options.archive_only {
            debug!(file = %item.file_name, "Needs transform, skipped in archive-only run");
            summary.skipped += 1;
            return Ok(());
        }

        if self
            .verifier
            .is_duplicate(&item.file_name, &item.classification)
            .await
        {
            let key = processed_archive_key(&item.file_name, &item.classification, key_field);
            summary.duplicates += 1;
            if self.services.objects.exists(&key).await? {
                debug!(file = %item.file_name, key = %key, "Already processed and archived");
            } else {
                info!(file = %item.file_name, key = %key, "Already processed, archiving original");
                self.fetch_and_archive(item, &key, containers).await?;
                summary.archived += 1;
            }
            return Ok(());
        }

        match self.queue.enqueue(&item.file_name, &item.provenance).await? {
            EnqueueOutcome::Created(_) => summary.enqueued += 1,
            EnqueueOutcome::AlreadyPending(id) => {
                debug!(file = %item.file_name, task_id = id, "Already queued");
            }
        }
        Ok(())
    }

    async fn fetch_and_archive(
        &self,
        item: &Discovered,
        key: &str,
        containers: &HashMap<String, StagedFile>,
    ) -> Result<()> {
        let staged = match &item.provenance {
            ProvenanceLocator::Direct { remote_id } => {
                let staged = self
                    .staging
                    .reserve(&StagingKey::hashed(&["direct", remote_id.as_str()]), &item.file_name)?;
                self.services.source.download(remote_id, staged.path()).await?;
                staged
            }
            ProvenanceLocator::InsideContainer { container, entry }
            | ProvenanceLocator::InsideNestedContainer {
                outer: container,
                inner: entry,
            } => {
                let origin = item.container_id.as_deref().unwrap_or(container.as_str());
                let key = StagingKey::hashed(&["entry", origin, entry.as_str()]);
                let staged_container = item.container_id.as_ref().and_then(|id| containers.get(id));
                match staged_container {
                    Some(staged) => {
                        self.extract(staged.path(), entry, &key, &item.file_name)
                            .await?
                    }
                    None => {
                        let outer = self
                            .stage_container(container, StagingKey::hashed(&["by-name", container.as_str()]))
                            .await?;
                        self.extract(outer.path(), entry, &key, &item.file_name)
                            .await?
                    }
                }
            }
        };

        self.services.objects.put(key, staged.path()).await?;
        info!(file = %item.file_name, key = %key, "Archived");
        Ok(())
    }

    /// Re-resolve a container by name from a fresh listing and stage it.
    async fn stage_container(&self, name: &str, key: StagingKey) -> Result<StagedFile> {
        let file = self
            .services
            .source
            .find_by_name(name)
            .await?
            .ok_or_else(|| IngestError::SourceFileNotFound(name.to_string()))?;
        let staged = self.staging.reserve(&key, &file.name)?;
        self.services.source.download(&file.id, staged.path()).await?;
        Ok(staged)
    }

    async fn extract(
        &self,
        container: &Path,
        entry: &str,
        key: &StagingKey,
        file_name: &str,
    ) -> Result<StagedFile> {
        let staged = self.staging.reserve(key, file_name)?;
        let (container, entry, dest) = (
            container.to_path_buf(),
            entry.to_string(),
            staged.path().to_path_buf(),
        );
        tokio::task::spawn_blocking(move || extract_entry(&container, &entry, &dest))
            .await
            .map_err(|e| IngestError::InvalidState(format!("extraction task failed: {}", e)))??;
        Ok(staged)
    }

    // ========================================================================
    // Phase 2
    // ========================================================================

    /// Run every pending task, at most `max_concurrent_tasks` at a time.
    pub async fn process_pending(&self, options: &RunOptions, summary: &mut RunSummary) -> Result<()> {
        let tasks: Vec<Task> = self
            .queue
            .dequeue_pending()
            .await?
            .into_iter()
            .filter(|task| options.admits(&self.classifier.classify(&task.file_name)))
            .collect();

        if tasks.is_empty() {
            info!("No pending tasks");
            return Ok(());
        }
        info!(count = tasks.len(), limit = self.settings.max_concurrent_tasks, "Processing tasks");

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_tasks.max(1)));
        let mut set = JoinSet::new();

        for task in tasks {
            let this = self.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return TaskOutcome {
                        file_name: task.file_name,
                        result: Err("task pool closed".to_string()),
                    };
                };
                this.process_task(task).await
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => match outcome.result {
                    Ok(report) => {
                        summary.processed += 1;
                        summary.rows_inserted += report.inserted;
                        summary.rows_failed += report.failed;
                    }
                    Err(message) => {
                        summary.errored += 1;
                        summary.errors.push((outcome.file_name, message));
                    }
                },
                Err(e) => {
                    // A panicked task was never marked and stays PENDING.
                    error!("Task aborted: {}", e);
                    summary.errored += 1;
                }
            }
        }

        info!(processed = summary.processed, errored = summary.errored, "Phase 2 complete");
        Ok(())
    }

    async fn process_task(&self, task: Task) -> TaskOutcome {
        let result = self.execute_task(&task).await;

        let (status, message) = match &result {
            Ok(_) => (TaskStatus::Processed, None),
            Err(e) => (TaskStatus::Error, Some(e.to_string())),
        };
        match &message {
            None => info!(task_id = task.id, file = %task.file_name, "Task processed"),
            Some(m) => error!(task_id = task.id, file = %task.file_name, "Task failed: {}", m),
        }
        if let Err(e) = self.queue.mark(task.id, status, message.as_deref()).await {
            error!(task_id = task.id, "Could not update task status: {}", e);
        }

        TaskOutcome {
            file_name: task.file_name,
            result: result.map_err(|e| e.to_string()),
        }
    }

    /// fetch → transform+load → archive → record.
    async fn execute_task(&self, task: &Task) -> Result<LoadReport> {
        let locator = task.locator()?;
        let classification = self.classifier.classify(&task.file_name);
        let Some(doc_type) = classification.doc_type().map(str::to_string) else {
            return Err(IngestError::InvalidState(format!(
                "{} no longer matches any rule",
                task.file_name
            )));
        };

        let staged = self.stage_for_task(task, &locator).await?;

        let report = self
            .services
            .loader
            .run(&TransformInput {
                task_id: task.id,
                file_name: task.file_name.clone(),
                classification: classification.clone(),
                path: staged.path().to_path_buf(),
            })
            .await?;

        let key = processed_archive_key(&task.file_name, &classification, &self.settings.archive_key_field);
        self.services.objects.put(&key, staged.path()).await?;

        let timestamp_field = match self.verifier.table().get(&doc_type) {
            Some(VerificationStrategy::Timestamp(check)) => check.timestamp_field.as_str(),
            _ => "timestamp",
        };
        self.services
            .processed
            .record_processed(&NewProcessedRecord {
                identifier: processing_identifier(&task.file_name, &classification),
                file_name: task.file_name.clone(),
                ruc: classification.field("ruc").map(str::to_string),
                timestamp: classification
                    .field(timestamp_field)
                    .and_then(|t| t.parse().ok()),
                doc_type,
            })
            .await?;

        Ok(report)
    }

    /// Bring a task's bytes into staging according to its provenance.
    async fn stage_for_task(&self, task: &Task, locator: &ProvenanceLocator) -> Result<StagedFile> {
        let key = StagingKey::task(task.id);
        match locator {
            ProvenanceLocator::Direct { remote_id } => {
                let staged = self.staging.reserve(&key, &task.file_name)?;
                self.services.source.download(remote_id, staged.path()).await?;
                Ok(staged)
            }
            ProvenanceLocator::InsideContainer { container, entry }
            | ProvenanceLocator::InsideNestedContainer {
                outer: container,
                inner: entry,
            } => {
                let task_id = task.id.to_string();
                let outer = self
                    .stage_container(container, StagingKey::hashed(&["task", task_id.as_str(), container.as_str()]))
                    .await?;
                self.extract(outer.path(), entry, &key, &task.file_name).await
            }
        }
    }
}
