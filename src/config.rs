// ABOUTME: Parses the dba configuration file and merges command-line overrides
// ABOUTME: Converts TOML format into connection and versioning settings

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;

pub const DEFAULT_VERSION_TABLE: &str = "alembic_version";
pub const DEFAULT_VERSION_COLUMN: &str = "version_num";

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct DbaConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub versioning: VersioningConfig,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    /// Schema the application tables live in; `current_schema()` when unset
    pub search_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct VersioningConfig {
    #[serde(default = "default_version_table")]
    pub table: String,
    #[serde(default = "default_version_column")]
    pub column: String,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            table: default_version_table(),
            column: default_version_column(),
        }
    }
}

fn default_version_table() -> String {
    DEFAULT_VERSION_TABLE.to_string()
}

fn default_version_column() -> String {
    DEFAULT_VERSION_COLUMN.to_string()
}

impl DbaConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path))?;
        Self::from_toml(&raw).with_context(|| format!("Failed to parse TOML config at {}", path))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: DbaConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line / environment values on top of the file values
    pub fn with_overrides(mut self, url: Option<String>, search_path: Option<String>) -> Self {
        if url.is_some() {
            self.database.url = url;
        }
        if search_path.is_some() {
            self.database.search_path = search_path;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(schema) = &self.database.search_path {
            crate::utils::validate_postgres_identifier(schema)
                .context("Invalid database.search_path")?;
        }
        crate::utils::validate_postgres_identifier(&self.versioning.table)
            .context("Invalid versioning.table")?;
        crate::utils::validate_postgres_identifier(&self.versioning.column)
            .context("Invalid versioning.column")?;
        Ok(())
    }

    pub fn database_url(&self) -> Result<&str> {
        match self.database.url.as_deref() {
            Some(url) => Ok(url),
            None => bail!(
                "No database URL configured.\n\
                 Pass --database-url, set DATABASE_URL, or add [database] url to the config file"
            ),
        }
    }
}
