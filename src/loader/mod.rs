// ABOUTME: Reference-resolving loader for declarative YAML/JSON data documents
// ABOUTME: Resolves cross-table references to row identities and inserts rows parents-first

pub mod settings;

pub use settings::{FieldNameTransform, LoaderSettings};

use crate::error::DbaError;
use crate::models::{ModelRegistry, TableModel};
use crate::serializer::Format;
use crate::session::Session;
use crate::utils::{ensure_extension, require_file};
use anyhow::{bail, Context, Result};
use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tokio_postgres::{GenericClient, Transaction};

/// Rows inserted per table, nested records included
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSummary {
    pub inserted: BTreeMap<String, usize>,
}

impl LoadSummary {
    pub fn total(&self) -> usize {
        self.inserted.values().sum()
    }

    fn merge(&mut self, counts: BTreeMap<String, usize>) {
        for (table, count) in counts {
            *self.inserted.entry(table).or_default() += count;
        }
    }
}

/// Load a YAML or JSON document into the current schema
///
/// Every top-level row, together with the nested records it creates, is
/// committed on its own. A failing row aborts the load but leaves the rows
/// before it in place.
pub async fn load(session: &mut Session, format: Format, filename: &str) -> Result<LoadSummary> {
    if !matches!(format, Format::Yaml | Format::Json) {
        bail!("The loader reads yaml or json documents, not {}", format);
    }

    let path = ensure_extension(filename, format.extension());
    require_file(&path)?;
    tracing::info!("Input filename: {}", path.display());

    let document = read_document(&path, format)?;
    let settings = LoaderSettings::from_document(&document)?;
    let registry = session.models().clone();

    let mut summary = LoadSummary::default();

    for (table, rows) in &document {
        if table.starts_with("__") {
            continue;
        }
        let Some(model) = registry.get(table) else {
            tracing::warn!("⚠ {}, skipped", DbaError::UnknownTable(table.clone()));
            continue;
        };
        let rows = rows
            .as_array()
            .with_context(|| format!("Rows of '{}' must be a list", table))?;

        tracing::info!("Table: {} ({} rows)", table, rows.len());
        for (index, row) in rows.iter().enumerate() {
            let row = row
                .as_object()
                .with_context(|| format!("Row {} of '{}' must be a mapping", index + 1, table))?;

            let transaction = session.transaction().await?;
            let loader = RowLoader {
                transaction: &transaction,
                registry: &registry,
                settings: &settings,
            };
            let mut counts = BTreeMap::new();
            loader
                .update_record(model, row, &mut counts)
                .await
                .with_context(|| format!("Failed to load row {} of '{}'", index + 1, table))?;
            transaction
                .commit()
                .await
                .with_context(|| format!("Failed to commit row {} of '{}'", index + 1, table))?;
            summary.merge(counts);
        }
    }

    tracing::info!("✓ Loaded {} records", summary.total());
    Ok(summary)
}

/// Parse a loader document; the top level must be a mapping
pub fn read_document(path: &Path, format: Format) -> Result<Map<String, Value>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let document: Value = match format {
        Format::Json => serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse JSON document {}", path.display()))?,
        _ => serde_yaml::from_reader(reader)
            .with_context(|| format!("Failed to parse YAML document {}", path.display()))?,
    };

    match document {
        Value::Object(map) => Ok(map),
        _ => bail!(
            "Loader document {} must map table names to rows",
            path.display()
        ),
    }
}

/// Identity of the single row of `table` matching `field` = `value`
///
/// `field` and `value` are either a field name and a scalar, or two lists of
/// equal length for a composite match. Field names go through the settings'
/// prefix and transform for `table`.
pub async fn get_reference<C: GenericClient>(
    client: &C,
    registry: &ModelRegistry,
    settings: &LoaderSettings,
    table: &str,
    field: &Value,
    value: &Value,
) -> Result<Value> {
    let model = registry
        .get(table)
        .ok_or_else(|| DbaError::UnknownTable(table.to_string()))?;
    let filter = reference_filter(settings, table, field, value)?;
    single_identity(client, model, &filter).await
}

/// Equality filter (column → value) for a reference
pub fn reference_filter(
    settings: &LoaderSettings,
    table: &str,
    field: &Value,
    value: &Value,
) -> Result<Map<String, Value>> {
    let mut filter = Map::new();
    match (field, value) {
        (Value::String(field), value) => {
            filter.insert(settings.resolve_fieldname(table, field), value.clone());
        }
        (Value::Array(fields), Value::Array(values)) => {
            if fields.len() != values.len() {
                return Err(DbaError::InvalidReference(format!(
                    "{} fields but {} values for '{}'",
                    fields.len(),
                    values.len(),
                    table
                ))
                .into());
            }
            for (field, value) in fields.iter().zip(values) {
                let Some(field) = field.as_str() else {
                    return Err(DbaError::InvalidReference(format!(
                        "field names of '{}' must be strings, got {}",
                        table, field
                    ))
                    .into());
                };
                filter.insert(settings.resolve_fieldname(table, field), value.clone());
            }
        }
        (Value::Array(_), other) => {
            return Err(DbaError::InvalidReference(format!(
                "composite reference into '{}' needs a list of values, got {}",
                table, other
            ))
            .into())
        }
        (other, _) => {
            return Err(DbaError::InvalidReference(format!(
                "reference field for '{}' must be a name or a list of names, got {}",
                table, other
            ))
            .into())
        }
    }
    Ok(filter)
}

async fn single_identity<C: GenericClient>(
    client: &C,
    model: &TableModel,
    filter: &Map<String, Value>,
) -> Result<Value> {
    // Two rows are enough to tell a unique match from an ambiguous one
    let mut identities = model.find_identities(client, filter, 2).await?;
    if identities.len() != 1 {
        return Err(DbaError::AmbiguousOrMissingReference {
            table: model.name.clone(),
            count: identities.len(),
        }
        .into());
    }
    Ok(identities.remove(0))
}

struct RowLoader<'a, 't> {
    transaction: &'a Transaction<'t>,
    registry: &'a ModelRegistry,
    settings: &'a LoaderSettings,
}

impl<'a, 't> RowLoader<'a, 't> {
    /// Build and insert one row of `model`, inserting or looking up the rows it
    /// references first. Returns the identity of the inserted row.
    fn update_record<'m>(
        &'m self,
        model: &'m TableModel,
        row: &'m Map<String, Value>,
        inserted: &'m mut BTreeMap<String, usize>,
    ) -> LocalBoxFuture<'m, Result<Option<Value>>> {
        async move {
            let mut builder = model.builder();

            for (field, value) in row {
                let column = self.settings.resolve_fieldname(&model.name, field);
                let resolved = match value {
                    Value::Null => {
                        tracing::debug!("Field: {}.{} is null, skipped", model.name, column);
                        continue;
                    }
                    Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
                    Value::Array(items) => self.list_reference(items).await?,
                    Value::Object(spec) => {
                        match self
                            .object_reference(&model.name, field, spec, &mut *inserted)
                            .await?
                        {
                            Some(identity) => identity,
                            None => continue,
                        }
                    }
                };

                tracing::debug!("Field: {}.{} with value {}", model.name, column, resolved);
                builder.set(&column, resolved)?;
            }

            let identity = model.insert(self.transaction, &builder.build()).await?;
            *inserted.entry(model.name.clone()).or_default() += 1;
            Ok(identity)
        }
        .boxed_local()
    }

    /// `[table, field, value]`, or `[table, value]` matched on the primary key
    async fn list_reference(&self, items: &[Value]) -> Result<Value> {
        let table = match items.first() {
            Some(Value::String(table)) => table.as_str(),
            _ => {
                return Err(DbaError::InvalidReference(format!(
                    "list reference must start with a table name: {}",
                    Value::Array(items.to_vec())
                ))
                .into())
            }
        };

        match items {
            [_, field, value] => {
                get_reference(
                    self.transaction,
                    self.registry,
                    self.settings,
                    table,
                    field,
                    value,
                )
                .await
            }
            [_, value] => {
                let model = self
                    .registry
                    .get(table)
                    .ok_or_else(|| DbaError::UnknownTable(table.to_string()))?;
                let filter = primary_key_filter(model, value)?;
                single_identity(self.transaction, model, &filter).await
            }
            _ => Err(DbaError::InvalidReference(format!(
                "list reference into '{}' needs 2 or 3 elements, got {}",
                table,
                items.len()
            ))
            .into()),
        }
    }

    /// `{table, field, value}` looks a row up; `{table, fields}` inserts a
    /// nested row. `None` when the nested table is unknown.
    async fn object_reference(
        &self,
        parent: &str,
        field: &str,
        spec: &Map<String, Value>,
        inserted: &mut BTreeMap<String, usize>,
    ) -> Result<Option<Value>> {
        let table = reference_table(parent, field, spec)?;

        if let Some(ref_field) = spec.get("field") {
            let value = spec.get("value").unwrap_or(&Value::Null);
            let identity = get_reference(
                self.transaction,
                self.registry,
                self.settings,
                table,
                ref_field,
                value,
            )
            .await?;
            return Ok(Some(identity));
        }

        let fields = match spec.get("fields") {
            Some(Value::Object(fields)) => fields,
            other => {
                return Err(DbaError::InvalidReference(format!(
                    "'fields' of '{}.{}' must be a mapping, got {}",
                    parent,
                    field,
                    other.unwrap_or(&Value::Null)
                ))
                .into())
            }
        };

        let Some(model) = self.registry.get(table) else {
            tracing::warn!(
                "⚠ {}, field '{}.{}' skipped",
                DbaError::UnknownTable(table.to_string()),
                parent,
                field
            );
            return Ok(None);
        };

        let identity = self
            .update_record(model, fields, inserted)
            .await?
            .ok_or_else(|| DbaError::NoPrimaryKey(table.to_string()))?;
        Ok(Some(identity))
    }
}

/// Filter on the primary key of `model`; a composite key takes a list of values
fn primary_key_filter(model: &TableModel, value: &Value) -> Result<Map<String, Value>> {
    let mut filter = Map::new();
    match (model.primary_key.as_slice(), value) {
        ([], _) => return Err(DbaError::NoPrimaryKey(model.name.clone()).into()),
        ([column], value) => {
            filter.insert(column.clone(), value.clone());
        }
        (columns, Value::Array(values)) if columns.len() == values.len() => {
            for (column, value) in columns.iter().zip(values) {
                filter.insert(column.clone(), value.clone());
            }
        }
        (columns, other) => {
            return Err(DbaError::InvalidReference(format!(
                "primary key of '{}' has {} columns, got {}",
                model.name,
                columns.len(),
                other
            ))
            .into())
        }
    }
    Ok(filter)
}

/// Table named by an object reference of `parent.field`
///
/// The reference must carry `field` (look up a row) or `fields` (insert one)
/// before its `table` is considered.
fn reference_table<'s>(parent: &str, field: &str, spec: &'s Map<String, Value>) -> Result<&'s str> {
    if !spec.contains_key("field") && !spec.contains_key("fields") {
        return Err(DbaError::MissingReferenceField {
            table: parent.to_string(),
            field: field.to_string(),
        }
        .into());
    }

    let table = spec.get("table").and_then(Value::as_str).ok_or_else(|| {
        DbaError::InvalidReference(format!(
            "reference for '{}.{}' needs a 'table'",
            parent, field
        ))
    })?;
    Ok(table)
}
