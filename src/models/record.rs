// ABOUTME: Record representation and codecs (ordered mapping, SQL INSERT text)
// ABOUTME: Records are built through a builder that validates columns against the table model

use super::TableModel;
use crate::error::DbaError;
use crate::utils::quote_ident;
use anyhow::Result;
use serde_json::{Map, Value};

/// One row of a table as an ordered column → value mapping
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    table: String,
    fields: Map<String, Value>,
}

impl Record {
    pub fn new(table: &str, fields: Map<String, Value>) -> Self {
        Self {
            table: table.to_string(),
            fields,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Ordered column → value mapping
    pub fn to_dict(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_dict(self) -> Map<String, Value> {
        self.fields
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Single-line INSERT statement reproducing the record
    ///
    /// The table name is left unqualified so the statement lands in whatever
    /// schema is current when it is replayed.
    ///
    /// # Examples
    ///
    /// ```
    /// # use webapp_dba::models::Record;
    /// # use serde_json::json;
    /// let fields = json!({"id": 1, "name": "O'Brien"}).as_object().unwrap().clone();
    /// let record = Record::new("users", fields);
    /// assert_eq!(
    ///     record.to_sql(),
    ///     "INSERT INTO \"users\" (\"id\", \"name\") VALUES (1, 'O''Brien');"
    /// );
    /// ```
    pub fn to_sql(&self) -> String {
        self.render_sql(|_, value| sql_literal(value))
    }

    /// Like `to_sql`, with `json`/`jsonb` and array columns of `model` written
    /// as literals their column types accept
    pub fn to_sql_for(&self, model: &TableModel) -> String {
        self.render_sql(|column, value| match (model.column(column), value) {
            (_, Value::Null) => sql_literal(value),
            (Some(info), _) if info.is_json() => quote_string(&value.to_string()),
            (Some(info), Value::Array(_)) if info.is_array() => {
                quote_string(&pg_array_literal(value))
            }
            _ => sql_literal(value),
        })
    }

    fn render_sql<F>(&self, literal: F) -> String
    where
        F: Fn(&str, &Value) -> String,
    {
        if self.fields.is_empty() {
            return format!("INSERT INTO {} DEFAULT VALUES;", quote_ident(&self.table));
        }

        let columns: Vec<String> = self.fields.keys().map(|c| quote_ident(c)).collect();
        let values: Vec<String> = self
            .fields
            .iter()
            .map(|(column, value)| literal(column, value))
            .collect();

        format!(
            "INSERT INTO {} ({}) VALUES ({});",
            quote_ident(&self.table),
            columns.join(", "),
            values.join(", ")
        )
    }
}

/// Render a JSON value as a SQL literal PostgreSQL can cast to the column type
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_string(s),
        // json / jsonb / array columns
        other => quote_string(&other.to_string()),
    }
}

/// PostgreSQL array input syntax (`{"a","b"}`, nested braces for more
/// dimensions) for a JSON array
pub fn pg_array_literal(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let elements: Vec<String> = items.iter().map(array_element).collect();
            format!("{{{}}}", elements.join(","))
        }
        other => array_element(other),
    }
}

fn array_element(value: &Value) -> String {
    let quoted = |s: &str| format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""));
    match value {
        Value::Null => "NULL".to_string(),
        Value::Array(_) => pg_array_literal(value),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quoted(s),
        Value::Object(_) => quoted(&value.to_string()),
    }
}

fn quote_string(s: &str) -> String {
    if s.contains(['\n', '\r']) {
        let mut escaped = String::with_capacity(s.len() + 4);
        for ch in s.chars() {
            match ch {
                '\\' => escaped.push_str("\\\\"),
                '\'' => escaped.push_str("\\'"),
                '\n' => escaped.push_str("\\n"),
                '\r' => escaped.push_str("\\r"),
                '\t' => escaped.push_str("\\t"),
                c => escaped.push(c),
            }
        }
        format!("E'{}'", escaped)
    } else {
        format!("'{}'", s.replace('\'', "''"))
    }
}

/// Builds a record for one table, rejecting columns the table does not have
#[derive(Debug)]
pub struct RecordBuilder<'a> {
    model: &'a TableModel,
    fields: Map<String, Value>,
}

impl<'a> RecordBuilder<'a> {
    pub fn new(model: &'a TableModel) -> Self {
        Self {
            model,
            fields: Map::new(),
        }
    }

    pub fn set(&mut self, column: &str, value: Value) -> Result<&mut Self> {
        if !self.model.has_column(column) {
            return Err(DbaError::UnknownColumn {
                table: self.model.name.clone(),
                column: column.to_string(),
            }
            .into());
        }
        self.fields.insert(column.to_string(), value);
        Ok(self)
    }

    pub fn model(&self) -> &'a TableModel {
        self.model
    }

    pub fn build(self) -> Record {
        Record::new(&self.model.name, self.fields)
    }
}
