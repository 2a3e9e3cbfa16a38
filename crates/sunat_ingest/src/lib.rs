//! SUNAT document ingestion: classification, dedup, container expansion, task queue
//!
//! Documents land in a drop folder. Each one is identified from its file name,
//! checked against what was already processed, and then either archived as-is
//! or queued for Transform+Load.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐     ┌─────────────┐
//! │   Source    │     │  Classifier  │     │ Verification │     │ TaskQueue   │
//! │ (drop dir)  │────▶│ (name → doc  │────▶│ (duplicate?) │────▶│  (SQLite)   │
//! │             │     │  type)       │     │              │     │             │
//! └─────────────┘     └──────────────┘     └──────────────┘     └─────────────┘
//!        │                   ▲                                          │
//!        ▼                   │                                          ▼
//! ┌─────────────┐            │                                   ┌─────────────┐
//! │  Container  │────────────┘                                   │ Transform + │
//! │  Expander   │  (entries folded back into routing)            │ Load, then  │
//! └─────────────┘                                                │  archive    │
//!                                                                └─────────────┘
//! ```
//!
//! # Core Concepts
//!
//! - **NO-TRANSFORM** documents are archived verbatim under `<ruc>/<file name>`.
//! - **NEED-TRANSFORM** documents go through the queue and a [`TransformLoad`].
//! - **Provenance**: every task says where its bytes live, possibly inside an archive.

pub mod classifier;
pub mod config;
pub mod container;
pub mod db;
pub mod error;
pub mod keys;
pub mod object_store;
pub mod orchestrator;
pub mod processed;
pub mod provenance;
pub mod queue;
pub mod registry;
pub mod report;
pub mod source;
pub mod staging;
pub mod transform;
pub mod verification;

// Re-exports for convenience
pub use classifier::{base_name, Classification, Classifier};
pub use config::PipelineConfig;
pub use container::{ContainerExpander, ContainerFormat, DiscoveredEntry};
pub use error::{IngestError, Result};
pub use object_store::{LocalObjectStore, ObjectStore};
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorSettings, RunOptions};
pub use processed::{NewProcessedRecord, ProcessedStore, SqliteProcessedStore};
pub use provenance::ProvenanceLocator;
pub use queue::{EnqueueOutcome, QueueStats, Task, TaskQueue, TaskStatus};
pub use registry::{PatternRegistry, PatternRule};
pub use report::{LogReporter, RunReporter, RunSummary};
pub use source::{DocumentSource, LocalDirSource, SourceFile};
pub use staging::{StagedFile, Staging, StagingKey};
pub use transform::{DelimitedTableLoader, LoadReport, TableMapping, TransformInput, TransformLoad};
pub use verification::{
    KeyExpression, RowByRowCheck, SingleRowCheck, TimestampCheck, VerificationDispatcher,
    VerificationStrategy, VerificationTable,
};
