// ABOUTME: Loader command: loads a declarative data document with cross-table references
// ABOUTME: Logs how many rows were inserted per table

use crate::loader;
use crate::serializer::Format;
use crate::session::Session;
use anyhow::Result;

pub async fn loader(session: &mut Session, format: Format, filename: &str) -> Result<()> {
    let summary = loader::load(session, format, filename).await?;

    for (table, count) in &summary.inserted {
        tracing::info!("  ✓ {}: {} rows", table, count);
    }
    Ok(())
}
