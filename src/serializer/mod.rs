// ABOUTME: Bulk serialization of table records in YAML, JSON, CSV and raw SQL
// ABOUTME: Shared format definitions, blob layout and CSV file naming rules

pub mod export;
pub mod import;

pub use export::{export, ExportSummary};
pub use import::{import, ImportSummary};

use crate::models::ColumnInfo;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

pub const CSV_DELIMITER: u8 = b';';
pub const CSV_QUOTE: u8 = b'"';

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Yaml,
    Json,
    Sql,
    Csv,
}

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Format::Yaml => "yaml",
            Format::Json => "json",
            Format::Sql => "sql",
            Format::Csv => "csv",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// One table's worth of records in a YAML/JSON dump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableBlob {
    pub table: String,
    pub records: Vec<Map<String, Value>>,
}

/// `{base}-{table}.csv`
pub fn csv_path(base: &str, table: &str) -> PathBuf {
    PathBuf::from(format!("{}-{}.csv", base, table))
}

/// Split a CSV import file name into the base name and the table it targets
///
/// A trailing `.csv` is dropped. Without an explicit table, a `-` in the file
/// name (not the directory part) separates base and table:
/// `dump/out-users.csv` → (`dump/out`, `users`).
pub fn csv_source(filename: &str, table: Option<&str>) -> (String, Option<String>) {
    let base = crate::utils::strip_extension(filename, "csv");

    if let Some(table) = table {
        return (base.to_string(), Some(table.to_string()));
    }

    let file_start = base.rfind(['/', '\\']).map(|i| i + 1).unwrap_or(0);
    match base[file_start..].find('-') {
        Some(offset) => {
            let split = file_start + offset;
            (base[..split].to_string(), Some(base[split + 1..].to_string()))
        }
        None => (base.to_string(), None),
    }
}

/// Textual CSV field for a value of `column`; NULL becomes an empty field
///
/// `json`/`jsonb` values are always written as JSON text (a JSON string keeps
/// its quotes) and arrays as JSON arrays, so `csv_value` can read them back.
pub fn csv_field(value: &Value, column: Option<&ColumnInfo>) -> String {
    match value {
        Value::Null => String::new(),
        other if column.map(ColumnInfo::is_json).unwrap_or(false) => other.to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Value for a CSV field of `column` read back
///
/// Empty fields are NULL. `json`/`jsonb` and array columns hold JSON text,
/// anything else is passed as a string that PostgreSQL casts to the column type.
pub fn csv_value(field: &str, column: Option<&ColumnInfo>) -> Result<Value> {
    if field.is_empty() {
        return Ok(Value::Null);
    }
    match column {
        Some(info) if info.is_json() || info.is_array() => serde_json::from_str(field)
            .with_context(|| format!("Column '{}' expects JSON text, got '{}'", info.name, field)),
        _ => Ok(Value::String(field.to_string())),
    }
}
