// ABOUTME: Restore command: replaces the current schema with a backup schema
// ABOUTME: Validates the backup exists and asks for confirmation before overwriting

use super::{backup_schema, list_backups};
use crate::error::DbaError;
use crate::schema;
use crate::session::Session;
use anyhow::{Context, Result};
use dialoguer::{theme::ColorfulTheme, Confirm};

pub async fn restore(
    session: &mut Session,
    list: bool,
    name: Option<&str>,
    schema_name: Option<&str>,
    yes: bool,
) -> Result<()> {
    if list {
        return list_backups(session).await;
    }

    let current = session.schema().to_string();
    let source = backup_schema(session, name, schema_name).await?;

    let schemas = schema::list_schemas(session.client()).await?;
    if !schemas.contains(&source) {
        let err = DbaError::InvalidRestoreTarget { schema: source };
        tracing::error!("{}", err);
        schema::print_schema_list(&current, &schemas);
        return Err(err.into());
    }

    if !yes {
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Replace schema '{}' with the contents of '{}'?",
                current, source
            ))
            .default(false)
            .interact()
            .context("Failed to get confirmation")?;

        if !confirmed {
            tracing::warn!("⚠ User cancelled restore");
            anyhow::bail!("Restore cancelled by user");
        }
    }

    tracing::info!("Restoring '{}' from '{}'...", current, source);
    let summary = schema::copy_schema(session.client_mut(), &source, &current).await?;
    session.reload_models().await?;

    tracing::info!(
        "✓ Restore complete: {} tables, {} rows",
        summary.tables,
        summary.rows
    );
    Ok(())
}
