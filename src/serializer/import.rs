// ABOUTME: Import of records from YAML, JSON, raw SQL or per-table CSV files
// ABOUTME: Commits per record (YAML/JSON), per table (CSV) or once per stream (SQL)

use super::{csv_path, csv_source, csv_value, Format, TableBlob, CSV_DELIMITER, CSV_QUOTE};
use crate::error::DbaError;
use crate::models::TableModel;
use crate::session::Session;
use crate::utils::{ensure_extension, require_file};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportSummary {
    pub inserted: usize,
    /// Raw SQL statements that failed or did not affect exactly one row
    pub failed: usize,
    pub skipped_tables: Vec<String>,
    pub missing_files: Vec<PathBuf>,
}

/// Import records into the current schema
pub async fn import(
    session: &mut Session,
    format: Format,
    filename: &str,
    table: Option<&str>,
) -> Result<ImportSummary> {
    let summary = match format {
        Format::Csv => import_csv(session, filename, table).await?,
        Format::Sql => {
            let path = ensure_extension(filename, format.extension());
            require_file(&path)?;
            import_sql(session, &path).await?
        }
        Format::Yaml | Format::Json => {
            let path = ensure_extension(filename, format.extension());
            require_file(&path)?;
            let blob = read_blob(&path, format)?;
            import_blob(session, blob, table).await?
        }
    };

    tracing::info!(
        "✓ Imported {} records ({} failed statements, {} skipped tables)",
        summary.inserted,
        summary.failed,
        summary.skipped_tables.len()
    );

    Ok(summary)
}

pub fn read_blob(path: &Path, format: Format) -> Result<Vec<TableBlob>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let blob = match format {
        Format::Json => serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse JSON dump {}", path.display()))?,
        Format::Yaml => serde_yaml::from_reader(reader)
            .with_context(|| format!("Failed to parse YAML dump {}", path.display()))?,
        other => anyhow::bail!("{} is not a blob format", other),
    };
    Ok(blob)
}

async fn import_blob(
    session: &mut Session,
    blob: Vec<TableBlob>,
    table: Option<&str>,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    for entry in blob {
        if table.map(|wanted| wanted != entry.table).unwrap_or(false) {
            continue;
        }
        if entry.records.is_empty() {
            continue;
        }

        let Some(model) = session.model(&entry.table).cloned() else {
            tracing::warn!("⚠ {}, skipped", DbaError::UnknownTable(entry.table.clone()));
            summary.skipped_tables.push(entry.table);
            continue;
        };

        tracing::info!("Table: {} ({} records)", entry.table, entry.records.len());
        for dict in &entry.records {
            let record = model.record_from_dict(dict)?;
            let transaction = session.transaction().await?;
            model.insert(&transaction, &record).await?;
            transaction
                .commit()
                .await
                .with_context(|| format!("Failed to commit record into '{}'", entry.table))?;
            summary.inserted += 1;
        }
    }

    Ok(summary)
}

async fn import_csv(
    session: &mut Session,
    filename: &str,
    table: Option<&str>,
) -> Result<ImportSummary> {
    let (base, table) = csv_source(filename, table);
    let mut summary = ImportSummary::default();

    let models: Vec<TableModel> = session
        .models()
        .table_names()
        .iter()
        .filter(|t| table.as_deref().map(|wanted| wanted == t.as_str()).unwrap_or(true))
        .filter_map(|t| session.model(t).cloned())
        .collect();

    if let Some(wanted) = &table {
        if models.is_empty() {
            tracing::warn!("⚠ {}, skipped", DbaError::UnknownTable(wanted.clone()));
            summary.skipped_tables.push(wanted.clone());
        }
    }

    for model in &models {
        let path = csv_path(&base, &model.name);
        tracing::info!("Input filename: {}", path.display());
        if !path.is_file() {
            tracing::error!(
                "Filename must be formatted as {{name}}-{{table}}.csv: {}",
                DbaError::MissingFile(path.clone())
            );
            summary.missing_files.push(path);
            continue;
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(CSV_DELIMITER)
            .quote(CSV_QUOTE)
            .has_headers(true)
            .from_path(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let header = reader
            .headers()
            .with_context(|| format!("Failed to read header of {}", path.display()))?
            .clone();

        let transaction = session.transaction().await?;
        let mut inserted = 0;
        for row in reader.records() {
            let row = row.with_context(|| format!("Failed to read row of {}", path.display()))?;
            let mut builder = model.builder();
            for (field, value) in header.iter().zip(row.iter()) {
                builder.set(field, csv_value(value, model.column(field))?)?;
            }
            model.insert(&transaction, &builder.build()).await?;
            inserted += 1;
        }
        transaction
            .commit()
            .await
            .with_context(|| format!("Failed to commit records into '{}'", model.name))?;

        tracing::info!("No of records: {}", inserted);
        summary.inserted += inserted;
    }

    Ok(summary)
}

/// Statements of a raw SQL dump: non-blank lines that are not `--` comments
pub fn sql_statements(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("--"))
        .map(|line| line.trim_end_matches(';'))
}

async fn import_sql(session: &mut Session, path: &Path) -> Result<ImportSummary> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut summary = ImportSummary::default();

    let mut transaction = session.transaction().await?;
    for statement in sql_statements(&content) {
        tracing::debug!("{}", statement);

        // A failing statement must not abort the statements after it
        let savepoint = transaction
            .savepoint("dba_statement")
            .await
            .context("Failed to create savepoint")?;

        match savepoint.execute(statement, &[]).await {
            Ok(1) => {
                savepoint.commit().await.context("Failed to release savepoint")?;
                summary.inserted += 1;
            }
            Ok(rows) => {
                tracing::error!(
                    "{}",
                    DbaError::RowNotInserted {
                        statement: statement.to_string(),
                        rows,
                    }
                );
                savepoint.commit().await.context("Failed to release savepoint")?;
                summary.failed += 1;
            }
            Err(e) => {
                tracing::error!("Statement failed: {} ({})", statement, e);
                savepoint
                    .rollback()
                    .await
                    .context("Failed to roll back to savepoint")?;
                summary.failed += 1;
            }
        }
    }

    transaction
        .commit()
        .await
        .with_context(|| format!("Failed to commit statements from {}", path.display()))?;

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_statements_skip_comments_and_blanks() {
        let dump = "-- TABLE users\n\
                    INSERT INTO \"users\" (\"id\") VALUES (1);\n\
                    \n\
                    -- TABLE orders\n\
                    INSERT INTO \"orders\" (\"id\", \"user\") VALUES (1, 1);\n";
        let statements: Vec<&str> = sql_statements(dump).collect();

        assert_eq!(
            statements,
            vec![
                "INSERT INTO \"users\" (\"id\") VALUES (1)",
                "INSERT INTO \"orders\" (\"id\", \"user\") VALUES (1, 1)",
            ]
        );
    }

    #[test]
    fn test_read_blob_json_and_yaml() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("dump.json");
        std::fs::write(
            &json_path,
            r#"[{"table": "users", "records": [{"id": 1, "name": "Alice"}]}]"#,
        )
        .unwrap();

        let yaml_path = dir.path().join("dump.yaml");
        std::fs::write(
            &yaml_path,
            "- table: users\n  records:\n  - id: 1\n    name: Alice\n",
        )
        .unwrap();

        let from_json = read_blob(&json_path, Format::Json).unwrap();
        let from_yaml = read_blob(&yaml_path, Format::Yaml).unwrap();

        assert_eq!(from_json, from_yaml);
        assert_eq!(from_json[0].table, "users");
        assert_eq!(from_json[0].records[0]["name"], "Alice");
    }

    #[test]
    fn test_read_blob_rejects_malformed_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        std::fs::write(&path, r#"{"table": "users"}"#).unwrap();

        assert!(read_blob(&path, Format::Json).is_err());
    }
}
