// ABOUTME: Schema namespace registry: existing schemas, current schema and version tag
// ABOUTME: Also derives the backup schema name used by backup and restore

pub mod copy;

pub use copy::{copy_schema, CopySummary};

use crate::config::VersioningConfig;
use crate::error::DbaError;
use crate::utils::qualified_table;
use anyhow::{Context, Result};
use tokio_postgres::GenericClient;

/// List all user schemas, ordered by name
pub async fn list_schemas<C: GenericClient>(client: &C) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT nspname
             FROM pg_catalog.pg_namespace
             WHERE nspname NOT LIKE 'pg\\_%'
               AND nspname <> 'information_schema'
             ORDER BY nspname",
            &[],
        )
        .await
        .context("Failed to list schemas")?;

    Ok(rows.iter().map(|row| row.get(0)).collect())
}

pub async fn schema_exists<C: GenericClient>(client: &C, schema: &str) -> Result<bool> {
    let row = client
        .query_one(
            "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1)",
            &[&schema],
        )
        .await
        .with_context(|| format!("Failed to check whether schema '{}' exists", schema))?;
    Ok(row.get(0))
}

/// Version tag recorded by the migration tool in `schema`
pub async fn current_version<C: GenericClient>(
    client: &C,
    schema: &str,
    versioning: &VersioningConfig,
) -> Result<String> {
    let query = format!(
        "SELECT {}::text FROM {} LIMIT 1",
        crate::utils::quote_ident(&versioning.column),
        qualified_table(schema, &versioning.table)
    );

    let row = client.query_opt(&query, &[]).await.map_err(|e| {
        DbaError::VersionUnavailable(format!(
            "cannot read {}.{} ({})",
            versioning.table, versioning.column, e
        ))
    })?;

    match row.and_then(|row| row.get::<_, Option<String>>(0)) {
        Some(version) => Ok(version),
        None => Err(DbaError::VersionUnavailable(format!(
            "{}.{} is empty, pass --name instead",
            versioning.table, versioning.column
        ))
        .into()),
    }
}

/// Schemas whose name starts with `current`, as shown by `--list`
pub fn schemas_like<'a>(schemas: &'a [String], current: &str) -> Vec<&'a str> {
    schemas
        .iter()
        .filter(|s| s.starts_with(current))
        .map(String::as_str)
        .collect()
}

/// Print the schemas available for backup/restore
pub fn print_schema_list(current: &str, schemas: &[String]) {
    println!("Available schemas like {}", current);
    for schema in schemas_like(schemas, current) {
        println!("> {}", schema);
    }
}

/// Name of the schema a backup is written to (or a restore is read from)
///
/// | `--name` | `--schema` | result |
/// |---|---|---|
/// | – | – | `{current}_{version}` |
/// | – | `S` | `S` |
/// | `N` | – | `{current}_{N}` |
/// | `N` | `S` | `{S}_{N}` |
///
/// `version` is only consulted for the first row, so it is passed lazily.
pub fn backup_schema_name<F>(
    current: &str,
    name: Option<&str>,
    schema: Option<&str>,
    version: F,
) -> Result<String>
where
    F: FnOnce() -> Result<String>,
{
    let derived = match (name, schema) {
        (None, None) => format!("{}_{}", current, version()?),
        (None, Some(schema)) => schema.to_string(),
        (Some(name), None) => format!("{}_{}", current, name),
        (Some(name), Some(schema)) => format!("{}_{}", schema, name),
    };
    Ok(derived)
}

/// Migration version tags often contain characters that are not valid in an
/// identifier; map them to underscores.
pub fn version_suffix(version: &str) -> String {
    version
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
