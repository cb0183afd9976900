//! Output formatting helpers for human-readable and JSON output.

use tether::{SessionRecord, clock::format_millis};

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Column headings matching [`session_row`].
pub const SESSION_HEADERS: &[&str] = &["ID", "UUID", "OWNER", "STARTED", "TTL", "TTI", "AGENT"];

/// One table row describing `record`.
pub fn session_row(record: &SessionRecord) -> Vec<String> {
    vec![
        record.id.map(|id| id.to_string()).unwrap_or_default(),
        record.uuid.clone(),
        record
            .owner_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
        format_millis(record.started),
        duration(record.time_to_live),
        duration(record.time_to_idle),
        record.user_agent.clone().unwrap_or_else(|| "-".to_string()),
    ]
}

fn duration(millis: u64) -> String {
    match millis {
        0 => "none".to_string(),
        ms if ms % 1000 == 0 => format!("{}s", ms / 1000),
        ms => format!("{ms}ms"),
    }
}

/// Print a table with aligned columns in human-readable format.
///
/// `headers` and each row in `rows` must have the same length.
pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    if rows.is_empty() {
        return;
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let render = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
    };
    println!("{}", render(headers.to_vec()));
    for row in rows {
        println!("{}", render(row.iter().map(String::as_str).collect()));
    }
}
