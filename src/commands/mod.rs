// ABOUTME: Command implementations for each dba subcommand
// ABOUTME: Exports backup, restore, export, inport and loader commands

pub mod backup;
pub mod export;
pub mod inport;
pub mod loader;
pub mod restore;

pub use backup::backup;
pub use export::export;
pub use inport::inport;
pub use loader::loader;
pub use restore::restore;

use crate::schema;
use crate::session::Session;
use anyhow::{Context, Result};

/// Print the schemas that look like backups of the current schema
pub(crate) async fn list_backups(session: &Session) -> Result<()> {
    let schemas = schema::list_schemas(session.client()).await?;
    schema::print_schema_list(session.schema(), &schemas);
    Ok(())
}

/// Backup schema addressed by `--name` / `--schema`; reads the current
/// migration version when neither is given
pub(crate) async fn backup_schema(
    session: &Session,
    name: Option<&str>,
    schema_name: Option<&str>,
) -> Result<String> {
    let version = match (name, schema_name) {
        (None, None) => Some(
            schema::current_version(session.client(), session.schema(), session.versioning())
                .await?,
        ),
        _ => None,
    };
    if let Some(version) = &version {
        tracing::info!("Current version: {}", version);
    }

    schema::backup_schema_name(session.schema(), name, schema_name, || {
        version
            .as_deref()
            .map(schema::version_suffix)
            .context("Migration version was not read")
    })
}
