// ABOUTME: Model registry built from PostgreSQL catalog introspection
// ABOUTME: Maps table names to column/primary-key models and orders tables by foreign keys

pub mod record;

pub use record::{Record, RecordBuilder};

use crate::utils::{qualified_table, quote_ident};
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tokio_postgres::GenericClient;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    pub has_default: bool,
    /// `GENERATED ALWAYS AS (...) STORED`; never written directly
    pub generated: bool,
}

impl ColumnInfo {
    /// `json` or `jsonb`
    pub fn is_json(&self) -> bool {
        matches!(self.data_type.as_str(), "json" | "jsonb")
    }

    pub fn is_array(&self) -> bool {
        self.data_type.ends_with("[]")
    }

    /// `numeric` (any precision) or an array of it
    pub fn is_numeric(&self) -> bool {
        self.data_type == "numeric"
            || self.data_type.starts_with("numeric(")
            || self.data_type.starts_with("numeric[")
    }

    /// Select-list entry for reading the column of `t` as JSON
    ///
    /// `numeric` goes through text so no digits are lost to a floating point
    /// JSON number; PostgreSQL casts the text back on insert.
    fn projection(&self) -> String {
        let column = quote_ident(&self.name);
        if !self.is_numeric() {
            format!("t.{}", column)
        } else if self.is_array() {
            format!("t.{col}::text[] AS {col}", col = column)
        } else {
            format!("t.{col}::text AS {col}", col = column)
        }
    }
}

/// A table of one schema: its ordered columns and primary key
#[derive(Debug, Clone, PartialEq)]
pub struct TableModel {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_key: Vec<String>,
}

impl TableModel {
    pub fn qualified_name(&self) -> String {
        qualified_table(&self.schema, &self.name)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.name == column)
    }

    pub fn column(&self, column: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == column)
    }

    /// Columns of the record that can be written (generated columns are not)
    fn writable_columns<'r>(&self, record: &'r Record) -> Vec<&'r String> {
        record
            .columns()
            .filter(|c| !self.column(c).map(|info| info.generated).unwrap_or(false))
            .collect()
    }

    /// Column whose value identifies a row when it is referenced: the first
    /// primary-key column
    pub fn identity_column(&self) -> Option<&str> {
        self.primary_key.first().map(String::as_str)
    }

    pub fn builder(&self) -> RecordBuilder<'_> {
        RecordBuilder::new(self)
    }

    /// Build a validated record from a column → value mapping
    pub fn record_from_dict(&self, dict: &serde_json::Map<String, Value>) -> Result<Record> {
        let mut builder = self.builder();
        for (field, value) in dict {
            builder.set(field, value.clone())?;
        }
        Ok(builder.build())
    }

    /// Query reading every row as one JSON object, ordered by primary key
    pub fn select_query(&self) -> String {
        let order_by = if self.primary_key.is_empty() {
            String::new()
        } else {
            let keys: Vec<String> = self
                .primary_key
                .iter()
                .map(|k| format!("t.{}", quote_ident(k)))
                .collect();
            format!(" ORDER BY {}", keys.join(", "))
        };
        let projection: Vec<String> = self.columns.iter().map(ColumnInfo::projection).collect();
        format!(
            "SELECT row_to_json(r) FROM {} AS t CROSS JOIN LATERAL (SELECT {}) AS r{}",
            self.qualified_name(),
            projection.join(", "),
            order_by
        )
    }

    /// Read every row of the table, ordered by primary key
    pub async fn fetch_all<C: GenericClient>(&self, client: &C) -> Result<Vec<Record>> {
        let query = self.select_query();
        let rows = client
            .query(&query, &[])
            .await
            .with_context(|| format!("Failed to read rows from table '{}'", self.name))?;

        rows.iter()
            .map(|row| {
                let value: Value = row.get(0);
                match value {
                    Value::Object(fields) => Ok(Record::new(&self.name, fields)),
                    other => anyhow::bail!(
                        "Unexpected row representation for table '{}': {}",
                        self.name,
                        other
                    ),
                }
            })
            .collect()
    }

    /// Insert a record, letting PostgreSQL cast each JSON value to its column
    /// type. Columns absent from the record take their defaults.
    ///
    /// Returns the identity of the new row (`None` for tables without a
    /// primary key).
    pub async fn insert<C: GenericClient>(
        &self,
        client: &C,
        record: &Record,
    ) -> Result<Option<Value>> {
        let returning = match self.identity_column() {
            Some(column) => format!("to_json({})", quote_ident(column)),
            None => "NULL::json".to_string(),
        };

        let columns = self.writable_columns(record);
        let row = if columns.is_empty() {
            let query = format!(
                "INSERT INTO {} DEFAULT VALUES RETURNING {}",
                self.qualified_name(),
                returning
            );
            client.query_one(&query, &[]).await
        } else {
            let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            let columns = columns.join(", ");
            let query = format!(
                "INSERT INTO {table} ({columns}) \
                 SELECT {columns} FROM json_populate_record(NULL::{table}, $1::json) \
                 RETURNING {returning}",
                table = self.qualified_name(),
                columns = columns,
                returning = returning
            );
            let payload = record.to_value();
            client.query_one(&query, &[&payload]).await
        }
        .with_context(|| format!("Failed to insert record into '{}'", self.name))?;

        let identity: Option<Value> = row.get(0);
        Ok(identity.filter(|v| !v.is_null()))
    }

    /// Identities of the rows whose columns equal the given values
    ///
    /// At most `limit` identities are returned. Values are cast to the column
    /// types through `json_populate_record`, so a JSON string can match a
    /// timestamp or numeric column.
    pub async fn find_identities<C: GenericClient>(
        &self,
        client: &C,
        filter: &serde_json::Map<String, Value>,
        limit: i64,
    ) -> Result<Vec<Value>> {
        let identity = self
            .identity_column()
            .ok_or_else(|| crate::error::DbaError::NoPrimaryKey(self.name.clone()))?;

        for column in filter.keys() {
            if !self.has_column(column) {
                return Err(crate::error::DbaError::UnknownColumn {
                    table: self.name.clone(),
                    column: column.clone(),
                }
                .into());
            }
        }

        let conditions: Vec<String> = filter
            .keys()
            .map(|c| format!("t.{col} = wanted.{col}", col = quote_ident(c)))
            .collect();
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT to_json(t.{identity}) \
             FROM {table} AS t, json_populate_record(NULL::{table}, $1::json) AS wanted\
             {where_clause} LIMIT $2",
            identity = quote_ident(identity),
            table = self.qualified_name(),
            where_clause = where_clause
        );

        let payload = Value::Object(filter.clone());
        let rows = client
            .query(&query, &[&payload, &limit])
            .await
            .with_context(|| format!("Failed to look up rows in '{}'", self.name))?;

        Ok(rows.iter().map(|row| row.get::<_, Value>(0)).collect())
    }
}

/// All tables of one schema keyed by name
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    schema: String,
    tables: BTreeMap<String, TableModel>,
    order: Vec<String>,
}

impl ModelRegistry {
    /// Introspect every ordinary or partitioned table of `schema`
    ///
    /// Partitions are left out: their rows are read and written through the
    /// partitioned parent.
    pub async fn load<C: GenericClient>(client: &C, schema: &str) -> Result<Self> {
        tracing::debug!("Introspecting tables of schema '{}'", schema);

        let column_rows = client
            .query(
                "SELECT
                    c.relname,
                    a.attname,
                    pg_catalog.format_type(a.atttypid, a.atttypmod),
                    a.attnotnull,
                    (a.atthasdef OR a.attidentity <> '') AS has_default,
                    (a.attgenerated <> '') AS generated
                 FROM pg_catalog.pg_attribute a
                 JOIN pg_catalog.pg_class c ON a.attrelid = c.oid
                 JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
                 WHERE n.nspname = $1
                   AND c.relkind IN ('r', 'p')
                   AND NOT c.relispartition
                   AND a.attnum > 0
                   AND NOT a.attisdropped
                 ORDER BY c.relname, a.attnum",
                &[&schema],
            )
            .await
            .with_context(|| format!("Failed to list columns of schema '{}'", schema))?;

        let mut tables: BTreeMap<String, TableModel> = BTreeMap::new();
        for row in &column_rows {
            let table: String = row.get(0);
            let model = tables.entry(table.clone()).or_insert_with(|| TableModel {
                schema: schema.to_string(),
                name: table,
                columns: Vec::new(),
                primary_key: Vec::new(),
            });
            model.columns.push(ColumnInfo {
                name: row.get(1),
                data_type: row.get(2),
                not_null: row.get(3),
                has_default: row.get(4),
                generated: row.get(5),
            });
        }

        let key_rows = client
            .query(
                "SELECT c.relname, a.attname
                 FROM pg_catalog.pg_index i
                 JOIN pg_catalog.pg_class c ON c.oid = i.indrelid
                 JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
                 JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord) ON true
                 JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum
                 WHERE n.nspname = $1
                   AND i.indisprimary
                 ORDER BY c.relname, k.ord",
                &[&schema],
            )
            .await
            .with_context(|| format!("Failed to list primary keys of schema '{}'", schema))?;

        for row in &key_rows {
            let table: String = row.get(0);
            if let Some(model) = tables.get_mut(&table) {
                model.primary_key.push(row.get(1));
            }
        }

        let dependencies = list_foreign_key_dependencies(client, schema).await?;
        let order = dependency_order(tables.keys().cloned().collect(), &dependencies);

        tracing::debug!("Found {} tables in schema '{}'", tables.len(), schema);

        Ok(Self {
            schema: schema.to_string(),
            tables,
            order,
        })
    }

    pub fn from_models(schema: &str, models: Vec<TableModel>, dependencies: &[(String, String)]) -> Self {
        let tables: BTreeMap<String, TableModel> =
            models.into_iter().map(|m| (m.name.clone(), m)).collect();
        let order = dependency_order(tables.keys().cloned().collect(), dependencies);
        Self {
            schema: schema.to_string(),
            tables,
            order,
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn get(&self, table: &str) -> Option<&TableModel> {
        self.tables.get(table)
    }

    /// Table names with referenced tables before the tables referencing them
    pub fn table_names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Drop a bookkeeping table (e.g. the migration version table) from the registry
    pub fn without(mut self, table: &str) -> Self {
        self.tables.remove(table);
        self.order.retain(|name| name != table);
        self
    }
}

/// (referencing table, referenced table) pairs for foreign keys inside `schema`
pub async fn list_foreign_key_dependencies<C: GenericClient>(
    client: &C,
    schema: &str,
) -> Result<Vec<(String, String)>> {
    let rows = client
        .query(
            "SELECT DISTINCT c.relname, r.relname
             FROM pg_catalog.pg_constraint con
             JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
             JOIN pg_catalog.pg_class r ON r.oid = con.confrelid
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
             JOIN pg_catalog.pg_namespace rn ON rn.oid = r.relnamespace
             WHERE con.contype = 'f'
               AND n.nspname = $1
               AND rn.nspname = $1",
            &[&schema],
        )
        .await
        .with_context(|| format!("Failed to list foreign keys of schema '{}'", schema))?;

    Ok(rows.iter().map(|row| (row.get(0), row.get(1))).collect())
}

/// Order tables so that every referenced table precedes its referencing tables
///
/// Ties are broken by name. Self references are ignored; tables caught in a
/// reference cycle are appended in name order.
pub fn dependency_order(tables: Vec<String>, dependencies: &[(String, String)]) -> Vec<String> {
    let known: BTreeSet<&str> = tables.iter().map(String::as_str).collect();
    let mut pending: BTreeMap<&str, BTreeSet<&str>> =
        known.iter().map(|t| (*t, BTreeSet::new())).collect();

    for (child, parent) in dependencies {
        if child == parent || !known.contains(parent.as_str()) {
            continue;
        }
        if let Some(parents) = pending.get_mut(child.as_str()) {
            parents.insert(parent.as_str());
        }
    }

    let mut order: Vec<String> = Vec::with_capacity(tables.len());
    loop {
        let ready: Vec<&str> = pending
            .iter()
            .filter(|(_, parents)| parents.is_empty())
            .map(|(table, _)| *table)
            .collect();
        if ready.is_empty() {
            break;
        }
        for table in ready {
            pending.remove(table);
            for parents in pending.values_mut() {
                parents.remove(table);
            }
            order.push(table.to_string());
        }
    }

    if !pending.is_empty() {
        tracing::warn!(
            "⚠ Foreign key cycle between tables: {}",
            pending.keys().cloned().collect::<Vec<_>>().join(", ")
        );
        order.extend(pending.keys().map(|t| t.to_string()));
    }

    order
}
