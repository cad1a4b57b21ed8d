// ABOUTME: Export of table records to YAML, JSON, raw SQL or per-table CSV files
// ABOUTME: Tables are walked parents-first so the output can be re-imported as is

use super::{csv_field, csv_path, Format, TableBlob, CSV_DELIMITER, CSV_QUOTE};
use crate::models::{Record, TableModel};
use crate::session::Session;
use crate::utils::{ensure_extension, strip_extension};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportSummary {
    pub tables: usize,
    pub records: usize,
    pub files: Vec<PathBuf>,
}

/// Export every table of the current schema, or only `table`
pub async fn export(
    session: &Session,
    format: Format,
    filename: &str,
    table: Option<&str>,
) -> Result<ExportSummary> {
    let tables: Vec<&String> = session
        .models()
        .table_names()
        .iter()
        .filter(|t| table.map(|wanted| wanted == t.as_str()).unwrap_or(true))
        .collect();

    if let Some(wanted) = table {
        if tables.is_empty() {
            tracing::warn!(
                "⚠ {}",
                crate::error::DbaError::UnknownTable(wanted.to_string())
            );
        }
    }

    let mut summary = ExportSummary::default();
    let mut blob: Vec<TableBlob> = Vec::new();

    let mut single_file = match format {
        Format::Csv => None,
        _ => {
            let path = ensure_extension(filename, format.extension());
            tracing::info!("Output filename: {}", path.display());
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            Some((path, BufWriter::new(file)))
        }
    };

    for table in tables {
        let Some(model) = session.model(table) else {
            continue;
        };

        tracing::info!("Table: {}", table);
        let records = model.fetch_all(session.client()).await?;
        if records.is_empty() {
            tracing::warn!("Nothing to export from '{}'", table);
            continue;
        }

        match (format, single_file.as_mut()) {
            (Format::Csv, _) => {
                let path = csv_path(strip_extension(filename, "csv"), table);
                tracing::info!("Output filename: {}", path.display());
                write_csv(&path, model, &records)?;
                summary.files.push(path);
            }
            (Format::Sql, Some((_, writer))) => {
                write_sql(writer, model, &records)?;
            }
            _ => blob.push(TableBlob {
                table: table.clone(),
                records: records.iter().map(|r| r.to_dict().clone()).collect(),
            }),
        }

        tracing::info!("No of records: {}", records.len());
        summary.tables += 1;
        summary.records += records.len();
    }

    if let Some((path, mut writer)) = single_file {
        if matches!(format, Format::Yaml | Format::Json) {
            write_blob(&mut writer, format, &blob)?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to write {}", path.display()))?;
        summary.files.push(path);
    }

    tracing::info!(
        "✓ Exported {} records from {} tables",
        summary.records,
        summary.tables
    );

    Ok(summary)
}

/// One CSV file: header from the first record's columns, one row per record
pub fn write_csv(path: &Path, model: &TableModel, records: &[Record]) -> Result<()> {
    let Some(first) = records.first() else {
        return Ok(());
    };
    let header: Vec<&String> = first.columns().collect();

    let mut writer = csv::WriterBuilder::new()
        .delimiter(CSV_DELIMITER)
        .quote(CSV_QUOTE)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer
        .write_record(&header)
        .with_context(|| format!("Failed to write header to {}", path.display()))?;

    for record in records {
        let row: Vec<String> = header
            .iter()
            .map(|column| {
                record
                    .get(column)
                    .map(|value| csv_field(value, model.column(column)))
                    .unwrap_or_default()
            })
            .collect();
        writer
            .write_record(&row)
            .with_context(|| format!("Failed to write row to {}", path.display()))?;
    }

    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

/// `-- TABLE name` followed by one INSERT statement per record
pub fn write_sql<W: Write>(writer: &mut W, model: &TableModel, records: &[Record]) -> Result<()> {
    writeln!(writer, "-- TABLE {}", model.name).context("Failed to write SQL dump")?;
    for record in records {
        writeln!(writer, "{}", record.to_sql_for(model)).context("Failed to write SQL dump")?;
    }
    Ok(())
}

pub fn write_blob<W: Write>(writer: &mut W, format: Format, blob: &[TableBlob]) -> Result<()> {
    match format {
        Format::Yaml => {
            serde_yaml::to_writer(writer, blob).context("Failed to write YAML dump")?;
        }
        Format::Json => {
            let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
            let mut serializer = serde_json::Serializer::with_formatter(writer, formatter);
            serde::Serialize::serialize(blob, &mut serializer)
                .context("Failed to write JSON dump")?;
        }
        other => anyhow::bail!("{} is not a blob format", other),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::{column, users_model};
    use serde_json::{json, Value};

    fn notes_model() -> TableModel {
        TableModel {
            schema: "webapp".to_string(),
            name: "notes".to_string(),
            columns: vec![
                column("id", "integer"),
                column("body", "text"),
                column("extra", "text"),
            ],
            primary_key: vec!["id".to_string()],
        }
    }

    fn users() -> Vec<Record> {
        vec![
            Record::new("users", json!({"id": 1, "name": "Alice"}).as_object().unwrap().clone()),
            Record::new("users", json!({"id": 2, "name": "Bob"}).as_object().unwrap().clone()),
        ]
    }

    #[test]
    fn test_write_csv_users() {
        let dir = tempfile::tempdir().unwrap();
        let path = csv_path(dir.path().join("out").to_str().unwrap(), "users");
        write_csv(&path, &users_model(), &users()).unwrap();

        assert!(path.ends_with("out-users.csv"));
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["id;name", "1;Alice", "2;Bob"]);
    }

    #[test]
    fn test_write_csv_quotes_delimiters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out-notes.csv");
        let records = vec![Record::new(
            "notes",
            json!({"id": 1, "body": "a;b \"c\"", "extra": null})
                .as_object()
                .unwrap()
                .clone(),
        )];
        write_csv(&path, &notes_model(), &records).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "id;body;extra\n1;\"a;b \"\"c\"\"\";\n");
    }

    #[test]
    fn test_write_csv_json_and_array_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out-settings.csv");
        let model = TableModel {
            schema: "webapp".to_string(),
            name: "settings".to_string(),
            columns: vec![
                column("id", "integer"),
                column("payload", "jsonb"),
                column("tags", "text[]"),
            ],
            primary_key: vec!["id".to_string()],
        };
        let records = vec![Record::new(
            "settings",
            json!({"id": 1, "payload": "dark", "tags": ["x", "y"]})
                .as_object()
                .unwrap()
                .clone(),
        )];
        write_csv(&path, &model, &records).unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(CSV_DELIMITER)
            .quote(CSV_QUOTE)
            .from_path(&path)
            .unwrap();
        let header = reader.headers().unwrap().clone();
        let row = reader.records().next().unwrap().unwrap();
        let values: Vec<Value> = header
            .iter()
            .zip(row.iter())
            .map(|(field, text)| crate::serializer::csv_value(text, model.column(field)).unwrap())
            .collect();

        assert_eq!(values, vec![json!("1"), json!("dark"), json!(["x", "y"])]);
    }

    #[test]
    fn test_write_sql() {
        let mut out = Vec::new();
        write_sql(&mut out, &users_model(), &users()).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "-- TABLE users\n\
             INSERT INTO \"users\" (\"id\", \"name\") VALUES (1, 'Alice');\n\
             INSERT INTO \"users\" (\"id\", \"name\") VALUES (2, 'Bob');\n"
        );
    }

    #[test]
    fn test_write_blob_json_indent() {
        let blob = vec![TableBlob {
            table: "users".to_string(),
            records: users().into_iter().map(Record::into_dict).collect(),
        }];
        let mut out = Vec::new();
        write_blob(&mut out, Format::Json, &blob).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("[\n    {\n        \"table\": \"users\""));
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["records"][1]["name"], "Bob");
    }

    #[test]
    fn test_write_blob_yaml_parses_back() {
        let blob = vec![TableBlob {
            table: "users".to_string(),
            records: users().into_iter().map(Record::into_dict).collect(),
        }];
        let mut out = Vec::new();
        write_blob(&mut out, Format::Yaml, &blob).unwrap();

        let parsed: Vec<TableBlob> = serde_yaml::from_slice(&out).unwrap();
        assert_eq!(parsed, blob);
    }

    #[test]
    fn test_write_blob_rejects_row_formats() {
        let mut out = Vec::new();
        assert!(write_blob(&mut out, Format::Csv, &[]).is_err());
    }
}
