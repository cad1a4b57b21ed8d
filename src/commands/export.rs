// ABOUTME: Export command: writes the current schema's records to a dump file
// ABOUTME: One file for yaml/json/sql, one file per table for csv

use crate::serializer::{self, Format};
use crate::session::Session;
use anyhow::Result;

pub async fn export(
    session: &Session,
    format: Format,
    filename: &str,
    table: Option<&str>,
) -> Result<()> {
    tracing::info!("Exporting schema '{}' as {}", session.schema(), format);
    let summary = serializer::export(session, format, filename, table).await?;

    for file in &summary.files {
        tracing::info!("  ✓ {}", file.display());
    }
    Ok(())
}
