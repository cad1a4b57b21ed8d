// ABOUTME: Backup command: copies the current schema into a derived backup schema
// ABOUTME: An existing backup schema of the same name is replaced

use super::{backup_schema, list_backups};
use crate::schema;
use crate::session::Session;
use anyhow::Result;

pub async fn backup(
    session: &mut Session,
    list: bool,
    name: Option<&str>,
    schema_name: Option<&str>,
) -> Result<()> {
    if list {
        return list_backups(session).await;
    }

    let current = session.schema().to_string();
    let destination = backup_schema(session, name, schema_name).await?;

    if schema::schema_exists(session.client(), &destination).await? {
        tracing::warn!("⚠ Backup schema '{}' exists and will be replaced", destination);
    }

    tracing::info!("Backing up '{}' to '{}'...", current, destination);
    let summary = schema::copy_schema(session.client_mut(), &current, &destination).await?;

    tracing::info!(
        "✓ Backup complete: {} types, {} tables, {} partitions, {} rows, {} sequences, {} foreign keys",
        summary.types,
        summary.tables,
        summary.partitions,
        summary.rows,
        summary.sequences,
        summary.foreign_keys
    );
    Ok(())
}
