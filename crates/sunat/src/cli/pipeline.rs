//! `sunat run` and `sunat local`: wire the pipeline from config and execute it

use anyhow::Context;
use crate::cli::error::HelpfulError;
use crate::cli::output::{print_json, print_summary};
use std::path::PathBuf;
use std::sync::Arc;
use sunat_ingest::db::open_sqlite;
use sunat_ingest::verification::VerificationTable;
use sunat_ingest::{
    Collaborators, DelimitedTableLoader, DocumentSource, LocalDirSource, LocalObjectStore,
    LogReporter, Orchestrator, OrchestratorSettings, PatternRegistry, PipelineConfig, RunOptions,
    RunSummary, SqliteProcessedStore, Staging, TaskQueue,
};
use tracing::info;

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub archive_only: bool,
    pub json: bool,
}

#[derive(Debug, Clone)]
pub struct LocalArgs {
    pub pipeline: String,
    pub path: PathBuf,
    pub archive_only: bool,
    pub json: bool,
}

/// Full run over the configured drop folder.
pub fn run(config: PipelineConfig, args: RunArgs) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let summary = rt.block_on(async {
        let source = LocalDirSource::new(&config.source_dir)
            .map_err(|_| HelpfulError::path_not_found(&config.source_dir))?;
        let orchestrator = build_orchestrator(&config, Arc::new(source)).await?;
        let options = RunOptions {
            only_doc_type: None,
            archive_only: args.archive_only,
        };
        anyhow::Ok(orchestrator.run(&options).await?)
    })?;
    finish(&summary, args.json)
}

/// Run a single pipeline over a local file or directory.
pub fn local(config: PipelineConfig, args: LocalArgs) -> anyhow::Result<()> {
    let registry = PatternRegistry::sunat_default()?;
    if !registry.contains(&args.pipeline) {
        return Err(HelpfulError::unknown_pipeline(&args.pipeline, &registry.doc_types()).into());
    }
    if !args.path.exists() {
        return Err(HelpfulError::path_not_found(&args.path).into());
    }

    let rt = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let summary = rt.block_on(async {
        let source = LocalDirSource::new(&args.path)?;
        let orchestrator = build_orchestrator(&config, Arc::new(source)).await?;
        let options = RunOptions {
            only_doc_type: Some(args.pipeline.clone()),
            archive_only: args.archive_only,
        };
        anyhow::Ok(orchestrator.run(&options).await?)
    })?;
    finish(&summary, args.json)
}

/// Assemble an orchestrator over the stores named in `config`.
pub async fn build_orchestrator(
    config: &PipelineConfig,
    source: Arc<dyn DocumentSource>,
) -> anyhow::Result<Orchestrator> {
    let queue = TaskQueue::open(&config.queue_db_path)
        .await
        .map_err(|e| HelpfulError::database_unavailable(&config.queue_db_path, e))?;
    let processed = SqliteProcessedStore::open(&config.processed_db_path)
        .await
        .map_err(|e| HelpfulError::database_unavailable(&config.processed_db_path, e))?;
    let load_pool = open_sqlite(&config.load_db_path)
        .await
        .map_err(|e| HelpfulError::database_unavailable(&config.load_db_path, e))?;

    let services = Collaborators {
        source,
        objects: Arc::new(LocalObjectStore::new(&config.archive_dir)?),
        processed: Arc::new(processed),
        loader: Arc::new(DelimitedTableLoader::sunat_default(load_pool)?),
        reporter: Arc::new(LogReporter),
    };

    info!(
        queue = %config.queue_db_path.display(),
        archive = %config.archive_dir.display(),
        "Pipeline assembled"
    );

    Ok(Orchestrator::new(
        Arc::new(PatternRegistry::sunat_default()?),
        Arc::new(VerificationTable::sunat_default()),
        Arc::new(queue),
        Staging::new(&config.staging_dir)?,
        services,
        OrchestratorSettings::from(config),
    ))
}

fn finish(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(summary)?;
    } else {
        print_summary(summary);
    }
    if summary.has_errors() {
        anyhow::bail!("{} task(s) failed", summary.errored);
    }
    Ok(())
}
