use crate::domain::record::{format_display_date, QueueEntry};

pub const SUMMARY_HEADERS: [&str; 4] = ["Date Added", "Project", "SQFT", "Start Date"];

const COLUMN_SEPARATOR: &str = " | ";

/// Renders the queue as a fixed-width table of added date, project, floor
/// size, and start date. Columns widen to fit their longest cell.
pub fn render(entries: &[QueueEntry]) -> String {
    let rows = entries.iter().map(summary_row).collect::<Vec<_>>();

    let mut widths = SUMMARY_HEADERS.map(|header| header.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let header = SUMMARY_HEADERS.map(str::to_owned);
    std::iter::once(&header)
        .chain(rows.iter())
        .map(|row| render_row(row, &widths))
        .collect::<Vec<_>>()
        .join("\n")
}

fn summary_row(entry: &QueueEntry) -> [String; 4] {
    let record = &entry.record;
    [
        format_display_date(&entry.date_added),
        record.project_name().to_owned(),
        record.floor_size_sqft.to_string(),
        record.start_date.render_with(format_display_date),
    ]
}

fn render_row(row: &[String; 4], widths: &[usize; 4]) -> String {
    row.iter()
        .zip(widths.iter())
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join(COLUMN_SEPARATOR)
        .trim_end()
        .to_owned()
}
