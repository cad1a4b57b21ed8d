// ABOUTME: Database session shared by every dba command
// ABOUTME: Owns the client, the current schema and the model registry of that schema

use crate::config::{DbaConfig, VersioningConfig};
use crate::error::DbaError;
use crate::models::{ModelRegistry, TableModel};
use crate::postgres;
use crate::utils::{quote_ident, validate_postgres_identifier};
use anyhow::{Context, Result};
use tokio_postgres::{Client, Transaction};

pub struct Session {
    client: Client,
    schema: String,
    versioning: VersioningConfig,
    registry: ModelRegistry,
}

impl Session {
    /// Connect using the configuration and load the models of the current schema
    pub async fn open(config: &DbaConfig) -> Result<Self> {
        let url = config.database_url()?;
        tracing::info!("Connecting to database...");
        let client = postgres::connection::connect_with_retry(url)
            .await
            .context("Failed to connect to database")?;
        tracing::info!("✓ Connected");

        Self::with_client(client, config).await
    }

    /// Build a session over an existing connection
    pub async fn with_client(client: Client, config: &DbaConfig) -> Result<Self> {
        config.validate()?;

        if let Some(schema) = &config.database.search_path {
            validate_postgres_identifier(schema)?;
            client
                .batch_execute(&format!("SET search_path TO {}", quote_ident(schema)))
                .await
                .with_context(|| format!("Failed to set search_path to '{}'", schema))?;
        }

        let row = client
            .query_one("SELECT current_schema()", &[])
            .await
            .context("Failed to query current schema")?;
        let schema: Option<String> = row.get(0);
        let schema = match schema {
            Some(schema) => schema,
            None => {
                let requested = config
                    .database
                    .search_path
                    .clone()
                    .unwrap_or_else(|| "(search_path)".to_string());
                return Err(DbaError::SchemaNotFound(requested).into());
            }
        };

        let mut session = Self {
            client,
            schema,
            versioning: config.versioning.clone(),
            registry: ModelRegistry::default(),
        };
        session.reload_models().await?;
        Ok(session)
    }

    /// Re-read the table models of the current schema
    ///
    /// The migration version table is bookkeeping, not application data, and is
    /// left out of the registry.
    pub async fn reload_models(&mut self) -> Result<()> {
        let registry = ModelRegistry::load(&self.client, &self.schema).await?;
        self.registry = registry.without(&self.versioning.table);
        tracing::debug!(
            "Loaded {} table models from schema '{}'",
            self.registry.len(),
            self.schema
        );
        Ok(())
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn versioning(&self) -> &VersioningConfig {
        &self.versioning
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn model(&self, table: &str) -> Option<&TableModel> {
        self.registry.get(table)
    }

    /// Start a unit of work; the caller decides when to commit
    pub async fn transaction(&mut self) -> Result<Transaction<'_>> {
        self.client
            .transaction()
            .await
            .context("Failed to start transaction")
    }

    /// Exclusive access to the connection, for operations that manage their
    /// own transactions
    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }
}
