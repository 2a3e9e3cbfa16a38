//! Run summary and the reporting collaborator

use super::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// Counters for one orchestrator run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Files seen in the source listing plus entries found in containers
    pub scanned: usize,
    pub unrecognized: usize,
    pub containers_expanded: usize,
    /// Originals written to the object store
    pub archived: usize,
    pub duplicates: usize,
    pub enqueued: usize,
    /// Files dropped for a missing key field, fetch failure or unreadable container
    pub skipped: usize,
    pub processed: usize,
    pub errored: usize,
    pub rows_inserted: u64,
    pub rows_failed: u64,
    /// `(file name, message)` for each failed task
    pub errors: Vec<(String, String)>,
}

impl RunSummary {
    pub fn has_errors(&self) -> bool {
        self.errored > 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned={} unrecognized={} archived={} duplicates={} enqueued={} skipped={} processed={} errored={} rows={}/{}",
            self.scanned,
            self.unrecognized,
            self.archived,
            self.duplicates,
            self.enqueued,
            self.skipped,
            self.processed,
            self.errored,
            self.rows_inserted,
            self.rows_inserted + self.rows_failed,
        )
    }
}

#[async_trait]
pub trait RunReporter: Send + Sync {
    async fn report(&self, summary: &RunSummary) -> Result<()>;
}

/// Writes the summary to the log.
#[derive(Debug, Clone, Default)]
pub struct LogReporter;

#[async_trait]
impl RunReporter for LogReporter {
    async fn report(&self, summary: &RunSummary) -> Result<()> {
        info!(
            scanned = summary.scanned,
            archived = summary.archived,
            duplicates = summary.duplicates,
            enqueued = summary.enqueued,
            processed = summary.processed,
            errored = summary.errored,
            "Run finished"
        );
        for (file, message) in &summary.errors {
            warn!(file = %file, "Task failed: {}", message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let summary = RunSummary {
            scanned: 3,
            processed: 1,
            rows_inserted: 4,
            rows_failed: 1,
            ..Default::default()
        };
        let text = summary.to_string();
        assert!(text.contains("scanned=3"));
        assert!(text.contains("rows=4/5"));
        assert!(!summary.has_errors());
    }

    #[tokio::test]
    async fn test_log_reporter() {
        let summary = RunSummary {
            errored: 1,
            errors: vec![("a.zip".into(), "boom".into())],
            ..Default::default()
        };
        assert!(summary.has_errors());
        LogReporter.report(&summary).await.unwrap();
    }
}
