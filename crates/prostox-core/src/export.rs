//! Export of finished items as CSV, JSON or JSON Lines.
//!
//! Only `Done` items are exported. CSV follows the stock-site upload layout:
//! a `Filename,Title,Keywords,Category` header, every field quoted, keywords
//! joined with `", "`, CRLF line endings.

use crate::error::ExportError;
use crate::registry::Item;
use serde::Serialize;
use std::io::Write;

/// Default file name for CSV exports.
pub const DEFAULT_CSV_FILE_NAME: &str = "prostoxai_metadata.csv";
const DEFAULT_JSON_FILE_NAME: &str = "prostoxai_metadata.json";
const DEFAULT_JSONL_FILE_NAME: &str = "prostoxai_metadata.jsonl";

const CSV_HEADER: [&str; 4] = ["Filename", "Title", "Keywords", "Category"];
const CSV_LINE_END: &str = "\r\n";

/// Export format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    /// Single JSON array
    Json,
    /// One JSON object per line
    JsonLines,
}

impl ExportFormat {
    /// File name used when an export target is a directory.
    pub fn default_file_name(self) -> &'static str {
        match self {
            Self::Csv => DEFAULT_CSV_FILE_NAME,
            Self::Json => DEFAULT_JSON_FILE_NAME,
            Self::JsonLines => DEFAULT_JSONL_FILE_NAME,
        }
    }
}

/// One exported row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRecord {
    pub file_name: String,
    pub title: String,
    pub keywords: Vec<String>,
    pub category: String,
}

/// Rows for every done item, in registry order.
pub fn records(items: &[Item]) -> Vec<ExportRecord> {
    items
        .iter()
        .filter_map(|item| {
            item.metadata().map(|metadata| ExportRecord {
                file_name: item.file_name.clone(),
                title: metadata.title.clone(),
                keywords: metadata.keywords.clone(),
                category: metadata.category.clone(),
            })
        })
        .collect()
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn csv_line(fields: &[&str]) -> String {
    let quoted: Vec<String> = fields.iter().map(|f| quote(f)).collect();
    quoted.join(",")
}

/// Render done items as CSV.
pub fn to_csv(items: &[Item]) -> Result<String, ExportError> {
    let rows = records(items);
    if rows.is_empty() {
        return Err(ExportError::NothingToExport);
    }

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(csv_line(&CSV_HEADER));
    for row in &rows {
        let keywords = row.keywords.join(", ");
        lines.push(csv_line(&[
            row.file_name.as_str(),
            row.title.as_str(),
            keywords.as_str(),
            row.category.as_str(),
        ]));
    }
    Ok(lines.join(CSV_LINE_END))
}

/// Write done items to `writer` in `format`.
///
/// Returns the number of exported records.
pub fn write_export<W: Write>(
    mut writer: W,
    items: &[Item],
    format: ExportFormat,
) -> Result<usize, ExportError> {
    let rows = records(items);
    if rows.is_empty() {
        return Err(ExportError::NothingToExport);
    }

    match format {
        ExportFormat::Csv => {
            writer.write_all(to_csv(items)?.as_bytes())?;
        }
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, &rows).map_err(std::io::Error::other)?;
            writeln!(writer)?;
        }
        ExportFormat::JsonLines => {
            for row in &rows {
                serde_json::to_writer(&mut writer, row).map_err(std::io::Error::other)?;
                writeln!(writer)?;
            }
        }
    }
    writer.flush()?;
    tracing::debug!("Exported {} record(s) as {format:?}", rows.len());
    Ok(rows.len())
}
