//! Output formatting utilities for CLI commands

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use sunat_ingest::{RunSummary, TaskStatus};

/// Print a table with a cyan header row.
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    println!("{}", build_table(headers, rows));
}

fn build_table(headers: &[&str], rows: Vec<Vec<String>>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        table.add_row(row);
    }
    table
}

/// Print a table where each cell may carry a color.
pub fn print_table_colored(headers: &[&str], rows: Vec<Vec<(String, Option<Color>)>>) {
    let mut table = build_table(headers, Vec::new());
    for row in rows {
        let cells: Vec<Cell> = row
            .into_iter()
            .map(|(text, color)| match color {
                Some(c) => Cell::new(text).fg(c),
                None => Cell::new(text),
            })
            .collect();
        table.add_row(cells);
    }
    println!("{}", table);
}

pub fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Pending => Color::Yellow,
        TaskStatus::Processed => Color::Green,
        TaskStatus::Error => Color::Red,
    }
}

/// Shorten `text` to at most `max` characters, marking the cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept)
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Human-readable run summary.
pub fn print_summary(summary: &RunSummary) {
    let rows = vec![
        vec!["Scanned".to_string(), summary.scanned.to_string()],
        vec!["Unrecognized".to_string(), summary.unrecognized.to_string()],
        vec!["Containers expanded".to_string(), summary.containers_expanded.to_string()],
        vec!["Archived".to_string(), summary.archived.to_string()],
        vec!["Duplicates".to_string(), summary.duplicates.to_string()],
        vec!["Enqueued".to_string(), summary.enqueued.to_string()],
        vec!["Skipped".to_string(), summary.skipped.to_string()],
        vec!["Processed".to_string(), summary.processed.to_string()],
        vec!["Errored".to_string(), summary.errored.to_string()],
        vec![
            "Rows loaded".to_string(),
            format!("{} ({} rejected)", summary.rows_inserted, summary.rows_failed),
        ],
    ];
    print_table(&["Metric", "Value"], rows);

    if !summary.errors.is_empty() {
        println!();
        let rows = summary
            .errors
            .iter()
            .map(|(file, message)| {
                vec![
                    (file.clone(), None),
                    (truncate(message, 80), Some(Color::Red)),
                ]
            })
            .collect();
        print_table_colored(&["File", "Error"], rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
        assert_eq!(truncate("emisión", 7), "emisión");
    }

    #[test]
    fn test_build_table_renders_rows() {
        let table = build_table(&["A", "B"], vec![vec!["1".into(), "2".into()]]);
        let rendered = table.to_string();
        assert!(rendered.contains('A'));
        assert!(rendered.contains('2'));
    }
}
