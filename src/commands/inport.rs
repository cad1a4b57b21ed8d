// ABOUTME: Inport command: reads a dump file back into the current schema
// ABOUTME: Reports failed statements, skipped tables and missing CSV files

use crate::serializer::{self, Format};
use crate::session::Session;
use anyhow::Result;

pub async fn inport(
    session: &mut Session,
    format: Format,
    filename: &str,
    table: Option<&str>,
) -> Result<()> {
    tracing::info!("Importing {} into schema '{}'", format, session.schema());
    let summary = serializer::import(session, format, filename, table).await?;

    if summary.failed > 0 {
        tracing::warn!("⚠ {} statements were not applied", summary.failed);
    }
    for path in &summary.missing_files {
        tracing::warn!("⚠ Missing input file {}", path.display());
    }
    Ok(())
}
