//! `sunat tasks`: inspect and retry queued work

use anyhow::Context;
use crate::cli::error::HelpfulError;
use crate::cli::output::{print_json, print_table, print_table_colored, status_color, truncate};
use std::str::FromStr;
use sunat_ingest::{PipelineConfig, QueueStats, Task, TaskQueue, TaskStatus};

#[derive(Debug, Clone)]
pub enum TasksAction {
    List {
        status: Option<String>,
        limit: i64,
        json: bool,
    },
    Retry {
        id: i64,
    },
    Stats {
        json: bool,
    },
}

pub fn run(config: PipelineConfig, action: TasksAction) -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    rt.block_on(async {
        let queue = TaskQueue::open(&config.queue_db_path)
            .await
            .map_err(|e| HelpfulError::database_unavailable(&config.queue_db_path, e))?;

        match action {
            TasksAction::List {
                status,
                limit,
                json,
            } => list(&queue, status.as_deref(), limit, json).await,
            TasksAction::Retry { id } => retry(&queue, id).await,
            TasksAction::Stats { json } => stats(&queue, json).await,
        }
    })
}

fn parse_status(status: Option<&str>) -> anyhow::Result<Option<TaskStatus>> {
    match status {
        None => Ok(None),
        Some(s) => TaskStatus::from_str(s).map(Some).map_err(|_| {
            HelpfulError::new(format!("Invalid status: {}", s))
                .with_suggestion("TRY: One of: pending, processed, error")
                .into()
        }),
    }
}

async fn list(queue: &TaskQueue, status: Option<&str>, limit: i64, json: bool) -> anyhow::Result<()> {
    let status = parse_status(status)?;
    let tasks = queue.list(status, Some(limit)).await?;

    if json {
        return print_json(&tasks);
    }
    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    let rows = tasks.iter().map(task_row).collect();
    print_table_colored(&["ID", "File", "Status", "Source", "Updated", "Error"], rows);
    Ok(())
}

fn task_row(task: &Task) -> Vec<(String, Option<comfy_table::Color>)> {
    let source = match task.locator() {
        Ok(locator) => locator.to_string(),
        Err(_) => format!("(unreadable) {}", truncate(&task.provenance, 30)),
    };
    vec![
        (task.id.to_string(), None),
        (task.file_name.clone(), None),
        (task.status.to_string(), Some(status_color(task.status))),
        (truncate(&source, 50), None),
        (task.updated_at.clone(), None),
        (
            task.error_message
                .as_deref()
                .map(|m| truncate(m, 60))
                .unwrap_or_default(),
            None,
        ),
    ]
}

async fn retry(queue: &TaskQueue, id: i64) -> anyhow::Result<()> {
    let task = queue.get(id).await?.ok_or_else(|| {
        HelpfulError::new(format!("Task not found: {}", id))
            .with_suggestion("TRY: sunat tasks list --status error")
    })?;

    if task.status != TaskStatus::Error {
        return Err(HelpfulError::new(format!(
            "Task {} is {}, only ERROR tasks can be retried",
            id, task.status
        ))
        .into());
    }

    let outcome = queue.requeue(id).await?;
    if outcome.is_new() {
        println!("Requeued {} as task {}", task.file_name, outcome.task_id());
    } else {
        println!(
            "{} already has pending task {}",
            task.file_name,
            outcome.task_id()
        );
    }
    Ok(())
}

async fn stats(queue: &TaskQueue, json: bool) -> anyhow::Result<()> {
    let stats = queue.stats().await?;
    if json {
        return print_json(&stats);
    }
    print_table(&["Status", "Count"], stats_rows(&stats));
    Ok(())
}

fn stats_rows(stats: &QueueStats) -> Vec<Vec<String>> {
    vec![
        vec![TaskStatus::Pending.to_string(), stats.pending.to_string()],
        vec![TaskStatus::Processed.to_string(), stats.processed.to_string()],
        vec![TaskStatus::Error.to_string(), stats.error.to_string()],
        vec!["TOTAL".to_string(), stats.total().to_string()],
    ]
}
