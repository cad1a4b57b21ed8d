// ABOUTME: Typed error kinds raised by the dba commands
// ABOUTME: Carried inside anyhow::Error so callers can downcast to decide fatality

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbaError {
    #[error("File {} doesn't exist", .0.display())]
    MissingFile(PathBuf),

    #[error("Table '{0}' is not known in the current schema")]
    UnknownTable(String),

    #[error("Table '{table}' has no column named '{column}'")]
    UnknownColumn { table: String, column: String },

    #[error("Reference for '{table}.{field}' is missing 'field' or 'fields'")]
    MissingReferenceField { table: String, field: String },

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Reference lookup on '{table}' matched {count} rows, expected exactly one")]
    AmbiguousOrMissingReference { table: String, count: usize },

    #[error("Statement affected {rows} rows, expected 1: {statement}")]
    RowNotInserted { statement: String, rows: u64 },

    #[error("Schema '{schema}' does not exist, need to supply an existing name")]
    InvalidRestoreTarget { schema: String },

    #[error("Schema '{0}' does not exist")]
    SchemaNotFound(String),

    #[error("Table '{0}' has no primary key")]
    NoPrimaryKey(String),

    #[error("Unable to determine the current version: {0}")]
    VersionUnavailable(String),

    #[error("Invalid loader settings: {0}")]
    InvalidSettings(String),
}

/// Returns the typed error kind carried by an `anyhow::Error`, if any
pub fn kind(err: &anyhow::Error) -> Option<&DbaError> {
    err.chain().find_map(|cause| cause.downcast_ref::<DbaError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_kind_found_through_context() {
        let result: anyhow::Result<()> = Err(DbaError::UnknownTable("ghosts".to_string()))
            .context("Failed to load document");
        let err = result.unwrap_err();

        match kind(&err) {
            Some(DbaError::UnknownTable(name)) => assert_eq!(name, "ghosts"),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_kind_absent_for_plain_errors() {
        let err = anyhow::anyhow!("connection refused");
        assert!(kind(&err).is_none());
    }

    #[test]
    fn test_messages() {
        let err = DbaError::AmbiguousOrMissingReference {
            table: "users".to_string(),
            count: 0,
        };
        assert_eq!(
            err.to_string(),
            "Reference lookup on 'users' matched 0 rows, expected exactly one"
        );

        let err = DbaError::MissingFile(PathBuf::from("dump.yaml"));
        assert_eq!(err.to_string(), "File dump.yaml doesn't exist");
    }
}
