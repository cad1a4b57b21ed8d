// ABOUTME: Copies a whole schema namespace (types, structure, data, sequences, foreign keys)
// ABOUTME: The destination schema is dropped first, so a copy always fully replaces it

use crate::error::DbaError;
use crate::models::ModelRegistry;
use crate::utils::{qualified_table, quote_ident, validate_postgres_identifier};
use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use tokio_postgres::{Client, Transaction};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CopySummary {
    pub types: usize,
    pub tables: usize,
    pub partitions: usize,
    pub rows: u64,
    pub sequences: usize,
    pub foreign_keys: usize,
}

/// Copy every table of `source` into `destination`
///
/// Runs in a single transaction:
/// 1. drop `destination` (CASCADE) if it exists and recreate it
/// 2. recreate the enum, domain and composite types of `source`
/// 3. `CREATE TABLE ... (LIKE ... INCLUDING ALL)` for each table, with the
///    partitions of partitioned tables attached below their parent
/// 4. copy the rows of each table (partitioned tables through the parent)
/// 5. switch columns typed in `source` over to the `destination` types
/// 6. give serial columns their own sequences in `destination`, positioned at
///    the source's current value
/// 7. recreate foreign keys so they point at `destination` tables
///
/// # Errors
///
/// `SchemaNotFound` when `source` does not exist. A `source` whose columns use
/// types of `destination` is refused, since dropping `destination` would drop
/// those columns. Any database error rolls the whole copy back, leaving the
/// previous `destination` untouched.
pub async fn copy_schema(client: &mut Client, source: &str, destination: &str) -> Result<CopySummary> {
    validate_postgres_identifier(source).context("Invalid source schema name")?;
    validate_postgres_identifier(destination).context("Invalid destination schema name")?;
    if source == destination {
        bail!(
            "Source and destination schema are both '{}'; refusing to drop the source",
            source
        );
    }

    let transaction = client
        .transaction()
        .await
        .context("Failed to start schema copy transaction")?;

    if !super::schema_exists(&transaction, source).await? {
        return Err(DbaError::SchemaNotFound(source.to_string()).into());
    }

    let registry = ModelRegistry::load(&transaction, source).await?;

    let dependent = typed_columns(&transaction, source, destination).await?;
    if !dependent.is_empty() {
        let names: Vec<String> = dependent
            .iter()
            .map(|c| format!("{}.{}", c.table, c.column))
            .collect();
        bail!(
            "Columns of '{}' use types of '{}' ({}); replacing '{}' would drop them",
            source,
            destination,
            names.join(", "),
            destination
        );
    }

    if super::schema_exists(&transaction, destination).await? {
        tracing::warn!("⚠ Dropping existing schema '{}'", destination);
    }
    transaction
        .batch_execute(&format!(
            "DROP SCHEMA IF EXISTS {dst} CASCADE; CREATE SCHEMA {dst}",
            dst = quote_ident(destination)
        ))
        .await
        .with_context(|| format!("Failed to recreate schema '{}'", destination))?;

    // With only pg_catalog on the path every catalog definition is schema-qualified
    transaction
        .batch_execute("SET LOCAL search_path TO pg_catalog")
        .await
        .context("Failed to adjust search_path")?;

    let quoted_source: String = transaction
        .query_one("SELECT pg_catalog.quote_ident($1)", &[&source])
        .await
        .context("Failed to quote source schema")?
        .get(0);

    let mut summary = CopySummary::default();

    summary.types = copy_types(&transaction, source, destination, &quoted_source).await?;

    let partition_keys = partition_keys(&transaction, source).await?;
    for table in registry.table_names() {
        let mut statement = format!(
            "CREATE TABLE {} (LIKE {} INCLUDING ALL)",
            qualified_table(destination, table),
            qualified_table(source, table)
        );
        if let Some(key) = partition_keys.get(table) {
            statement.push_str(" PARTITION BY ");
            statement.push_str(&retarget_schema(key, &quoted_source, destination));
        }
        transaction
            .batch_execute(&statement)
            .await
            .with_context(|| format!("Failed to create table '{}'", table))?;
    }

    let tables: BTreeSet<String> = registry.table_names().iter().cloned().collect();
    summary.partitions =
        copy_partitions(&transaction, source, destination, &quoted_source, &tables).await?;

    for table in registry.table_names() {
        let Some(model) = registry.get(table) else {
            continue;
        };
        let src = qualified_table(source, table);
        let dst = qualified_table(destination, table);

        let columns: Vec<String> = model
            .columns
            .iter()
            .filter(|c| !c.generated)
            .map(|c| quote_ident(&c.name))
            .collect();
        let rows = if columns.is_empty() {
            0
        } else {
            let columns = columns.join(", ");
            transaction
                .execute(
                    &format!(
                        "INSERT INTO {dst} ({columns}) OVERRIDING SYSTEM VALUE \
                         SELECT {columns} FROM {src}",
                        dst = dst,
                        src = src,
                        columns = columns
                    ),
                    &[],
                )
                .await
                .with_context(|| format!("Failed to copy rows into {}", dst))?
        };

        tracing::info!("  ✓ {} ({} rows)", table, rows);
        summary.tables += 1;
        summary.rows += rows;
    }

    retype_columns(&transaction, source, destination, &quoted_source).await?;
    summary.sequences = copy_sequences(&transaction, source, destination).await?;
    summary.foreign_keys =
        copy_foreign_keys(&transaction, source, destination, &quoted_source).await?;

    transaction
        .commit()
        .await
        .with_context(|| format!("Failed to commit copy of '{}' to '{}'", source, destination))?;

    tracing::info!(
        "✓ Copied {} tables ({} rows) from '{}' to '{}'",
        summary.tables,
        summary.rows,
        source,
        destination
    );

    Ok(summary)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Enum,
    Domain,
    Composite,
}

/// A user-defined type as read from the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    /// Quoted labels (enum), base type (domain) or attribute list (composite)
    pub body: String,
    pub default: Option<String>,
    pub not_null: bool,
    /// Named CHECK constraints of a domain, space separated
    pub checks: Option<String>,
}

impl TypeDefinition {
    /// `CREATE TYPE`/`CREATE DOMAIN` statement for the copy in `destination`
    pub fn create_statement(&self, quoted_source: &str, destination: &str) -> String {
        let name = qualified_table(destination, &self.name);
        let retarget = |text: &str| retarget_schema(text, quoted_source, destination);
        match self.kind {
            TypeKind::Enum => format!("CREATE TYPE {} AS ENUM ({})", name, self.body),
            TypeKind::Composite => format!("CREATE TYPE {} AS ({})", name, retarget(&self.body)),
            TypeKind::Domain => {
                let mut statement = format!("CREATE DOMAIN {} AS {}", name, retarget(&self.body));
                if let Some(default) = &self.default {
                    statement.push_str(" DEFAULT ");
                    statement.push_str(&retarget(default));
                }
                if self.not_null {
                    statement.push_str(" NOT NULL");
                }
                if let Some(checks) = &self.checks {
                    statement.push(' ');
                    statement.push_str(&retarget(checks));
                }
                statement
            }
        }
    }
}

/// Recreate the enum, domain and composite types of `source` in `destination`
///
/// Types are created in the order they were originally created, so a domain
/// over an enum or a composite holding one finds its dependency in place.
async fn copy_types(
    transaction: &Transaction<'_>,
    source: &str,
    destination: &str,
    quoted_source: &str,
) -> Result<usize> {
    let rows = transaction
        .query(
            "SELECT t.typname,
                    t.typtype::text,
                    CASE t.typtype
                      WHEN 'e' THEN (
                        SELECT pg_catalog.string_agg(pg_catalog.quote_literal(e.enumlabel), ', '
                                                     ORDER BY e.enumsortorder)
                        FROM pg_catalog.pg_enum e
                        WHERE e.enumtypid = t.oid)
                      WHEN 'c' THEN (
                        SELECT pg_catalog.string_agg(
                                 pg_catalog.quote_ident(a.attname) || ' ' ||
                                 pg_catalog.format_type(a.atttypid, a.atttypmod), ', '
                                 ORDER BY a.attnum)
                        FROM pg_catalog.pg_attribute a
                        WHERE a.attrelid = t.typrelid AND a.attnum > 0 AND NOT a.attisdropped)
                      ELSE pg_catalog.format_type(t.typbasetype, t.typtypmod)
                    END,
                    pg_catalog.pg_get_expr(t.typdefaultbin, 0),
                    t.typnotnull,
                    (SELECT pg_catalog.string_agg(
                              'CONSTRAINT ' || pg_catalog.quote_ident(con.conname) || ' ' ||
                              pg_catalog.pg_get_constraintdef(con.oid), ' '
                              ORDER BY con.conname)
                     FROM pg_catalog.pg_constraint con
                     WHERE con.contypid = t.oid AND con.contype = 'c')
             FROM pg_catalog.pg_type t
             JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
             LEFT JOIN pg_catalog.pg_class c ON c.oid = t.typrelid
             WHERE n.nspname = $1
               AND (t.typtype IN ('e', 'd') OR (t.typtype = 'c' AND c.relkind = 'c'))
             ORDER BY t.oid",
            &[&source],
        )
        .await
        .with_context(|| format!("Failed to list types of schema '{}'", source))?;

    for row in &rows {
        let kind: String = row.get(1);
        let definition = TypeDefinition {
            name: row.get(0),
            kind: match kind.as_str() {
                "e" => TypeKind::Enum,
                "d" => TypeKind::Domain,
                _ => TypeKind::Composite,
            },
            body: row.get::<_, Option<String>>(2).unwrap_or_default(),
            default: row.get(3),
            not_null: row.get(4),
            checks: row.get(5),
        };

        transaction
            .batch_execute(&definition.create_statement(quoted_source, destination))
            .await
            .with_context(|| format!("Failed to recreate type '{}'", definition.name))?;
        tracing::debug!("  ✓ type {}", definition.name);
    }

    Ok(rows.len())
}

/// Partition key (`RANGE (created_at)`, ...) of each partitioned table in `schema`
async fn partition_keys(
    transaction: &Transaction<'_>,
    schema: &str,
) -> Result<BTreeMap<String, String>> {
    let rows = transaction
        .query(
            "SELECT c.relname, pg_catalog.pg_get_partkeydef(c.oid)
             FROM pg_catalog.pg_class c
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
             WHERE n.nspname = $1
               AND c.relkind = 'p'",
            &[&schema],
        )
        .await
        .with_context(|| format!("Failed to list partitioned tables of schema '{}'", schema))?;

    Ok(rows.iter().map(|row| (row.get(0), row.get(1))).collect())
}

/// A partition of a table in the same schema
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub name: String,
    pub parent: String,
    /// `FOR VALUES ...` or `DEFAULT`
    pub bound: String,
    /// Partition key when the partition is itself partitioned
    pub key: Option<String>,
}

/// Order partitions so each one comes after its parent
///
/// `tables` are the parents that already exist. Partitions whose parent never
/// shows up are left out.
pub fn partition_order(partitions: Vec<Partition>, tables: &BTreeSet<String>) -> Vec<Partition> {
    let mut created = tables.clone();
    let mut pending = partitions;
    let mut ordered = Vec::with_capacity(pending.len());

    loop {
        let (ready, waiting): (Vec<Partition>, Vec<Partition>) = pending
            .into_iter()
            .partition(|p| created.contains(&p.parent));
        if ready.is_empty() {
            for partition in &waiting {
                tracing::warn!(
                    "⚠ Partition '{}' of '{}' skipped, its parent is not copied",
                    partition.name,
                    partition.parent
                );
            }
            return ordered;
        }
        for partition in ready {
            created.insert(partition.name.clone());
            ordered.push(partition);
        }
        pending = waiting;
    }
}

/// Recreate the partitions of the copied partitioned tables
///
/// Partitions carry no rows of their own here; rows are copied through the
/// partitioned parent and routed by the destination's partition bounds.
async fn copy_partitions(
    transaction: &Transaction<'_>,
    source: &str,
    destination: &str,
    quoted_source: &str,
    tables: &BTreeSet<String>,
) -> Result<usize> {
    let rows = transaction
        .query(
            "SELECT c.relname,
                    p.relname,
                    pg_catalog.pg_get_expr(c.relpartbound, c.oid),
                    CASE WHEN c.relkind = 'p' THEN pg_catalog.pg_get_partkeydef(c.oid) END
             FROM pg_catalog.pg_class c
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
             JOIN pg_catalog.pg_inherits i ON i.inhrelid = c.oid
             JOIN pg_catalog.pg_class p ON p.oid = i.inhparent
             WHERE n.nspname = $1
               AND p.relnamespace = n.oid
               AND c.relispartition
             ORDER BY c.relname",
            &[&source],
        )
        .await
        .with_context(|| format!("Failed to list partitions of schema '{}'", source))?;

    let partitions = rows
        .iter()
        .map(|row| Partition {
            name: row.get(0),
            parent: row.get(1),
            bound: row.get(2),
            key: row.get(3),
        })
        .collect();

    let ordered = partition_order(partitions, tables);
    for partition in &ordered {
        let mut statement = format!(
            "CREATE TABLE {} PARTITION OF {} {}",
            qualified_table(destination, &partition.name),
            qualified_table(destination, &partition.parent),
            retarget_schema(&partition.bound, quoted_source, destination)
        );
        if let Some(key) = &partition.key {
            statement.push_str(" PARTITION BY ");
            statement.push_str(&retarget_schema(key, quoted_source, destination));
        }
        transaction
            .batch_execute(&statement)
            .await
            .with_context(|| format!("Failed to create partition '{}'", partition.name))?;
        tracing::info!("  ✓ {} (partition of {})", partition.name, partition.parent);
    }

    Ok(ordered.len())
}

/// A column whose type, or array element type, lives in another schema
#[derive(Debug, Clone, PartialEq)]
struct TypedColumn {
    table: String,
    column: String,
    data_type: String,
    default: Option<String>,
}

/// Columns of `table_schema` tables typed with a type of `type_schema`
///
/// Partitions are left out; altering the partitioned parent covers them.
async fn typed_columns(
    transaction: &Transaction<'_>,
    table_schema: &str,
    type_schema: &str,
) -> Result<Vec<TypedColumn>> {
    let rows = transaction
        .query(
            "SELECT c.relname,
                    a.attname,
                    pg_catalog.format_type(a.atttypid, a.atttypmod),
                    pg_catalog.pg_get_expr(d.adbin, d.adrelid)
             FROM pg_catalog.pg_attribute a
             JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
             JOIN pg_catalog.pg_type t ON t.oid = a.atttypid
             LEFT JOIN pg_catalog.pg_type e ON e.oid = t.typelem AND t.typcategory = 'A'
             JOIN pg_catalog.pg_namespace tn ON tn.oid = COALESCE(e.typnamespace, t.typnamespace)
             LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
             WHERE n.nspname = $1
               AND tn.nspname = $2
               AND c.relkind IN ('r', 'p')
               AND NOT c.relispartition
               AND a.attnum > 0
               AND NOT a.attisdropped
               AND a.attgenerated = ''
             ORDER BY c.relname, a.attnum",
            &[&table_schema, &type_schema],
        )
        .await
        .with_context(|| {
            format!(
                "Failed to list columns of '{}' typed in '{}'",
                table_schema, type_schema
            )
        })?;

    Ok(rows
        .iter()
        .map(|row| TypedColumn {
            table: row.get(0),
            column: row.get(1),
            data_type: row.get(2),
            default: row.get(3),
        })
        .collect())
}

/// Switch copied columns from `source` types to their `destination` copies
///
/// Values are converted through their text form. Column defaults are dropped
/// for the conversion and put back re-pointed at `destination`.
async fn retype_columns(
    transaction: &Transaction<'_>,
    source: &str,
    destination: &str,
    quoted_source: &str,
) -> Result<usize> {
    let columns = typed_columns(transaction, destination, source).await?;

    for typed in &columns {
        let table = qualified_table(destination, &typed.table);
        let column = quote_ident(&typed.column);
        let data_type = retarget_schema(&typed.data_type, quoted_source, destination);

        let mut statements = vec![
            format!("ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT", table, column),
            format!(
                "ALTER TABLE {table} ALTER COLUMN {column} TYPE {data_type} \
                 USING {column}::text::{data_type}",
                table = table,
                column = column,
                data_type = data_type
            ),
        ];
        if let Some(default) = &typed.default {
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                table,
                column,
                retarget_schema(default, quoted_source, destination)
            ));
        }

        transaction
            .batch_execute(&statements.join("; "))
            .await
            .with_context(|| {
                format!(
                    "Failed to change type of {}.{} to {}",
                    typed.table, typed.column, data_type
                )
            })?;
        tracing::debug!("  ✓ {}.{} is now {}", typed.table, typed.column, data_type);
    }

    Ok(columns.len())
}

/// Re-home sequences owned by source columns and carry over their positions
///
/// Serial sequences (`OWNED BY`) are recreated in `destination` and the column
/// default is re-pointed at them. Identity columns already received their own
/// sequence from `LIKE ... INCLUDING ALL`; only their position is copied.
async fn copy_sequences(
    transaction: &Transaction<'_>,
    source: &str,
    destination: &str,
) -> Result<usize> {
    let rows = transaction
        .query(
            "SELECT s.relname, t.relname, a.attname, d.deptype = 'i' AS is_identity
             FROM pg_catalog.pg_class s
             JOIN pg_catalog.pg_namespace n ON n.oid = s.relnamespace
             JOIN pg_catalog.pg_depend d
               ON d.objid = s.oid
              AND d.classid = 'pg_catalog.pg_class'::regclass
              AND d.refclassid = 'pg_catalog.pg_class'::regclass
              AND d.deptype IN ('a', 'i')
             JOIN pg_catalog.pg_class t ON t.oid = d.refobjid
             JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = d.refobjsubid
             WHERE s.relkind = 'S'
               AND n.nspname = $1
             ORDER BY s.relname",
            &[&source],
        )
        .await
        .with_context(|| format!("Failed to list sequences of schema '{}'", source))?;

    for row in &rows {
        let sequence: String = row.get(0);
        let table: String = row.get(1);
        let column: String = row.get(2);
        let is_identity: bool = row.get(3);

        let dst_table = qualified_table(destination, &table);

        if !is_identity {
            let dst_sequence = qualified_table(destination, &sequence);
            transaction
                .batch_execute(&format!(
                    "CREATE SEQUENCE {seq};
                     ALTER SEQUENCE {seq} OWNED BY {table}.{column};
                     ALTER TABLE {table} ALTER COLUMN {column} SET DEFAULT nextval('{seq_literal}'::regclass)",
                    seq = dst_sequence,
                    table = dst_table,
                    column = quote_ident(&column),
                    seq_literal = dst_sequence.replace('\'', "''"),
                ))
                .await
                .with_context(|| format!("Failed to recreate sequence {}", dst_sequence))?;
        }

        let query = format!(
            "SELECT setval(pg_catalog.pg_get_serial_sequence($1, $2), last_value, is_called) FROM {}",
            qualified_table(source, &sequence)
        );
        transaction
            .query_one(&query, &[&dst_table, &column])
            .await
            .with_context(|| format!("Failed to position sequence for {}.{}", dst_table, column))?;
    }

    Ok(rows.len())
}

/// Recreate the foreign keys of `source` tables on the `destination` copies
///
/// Keys cloned onto partitions are skipped; adding the key to the partitioned
/// parent clones it again.
async fn copy_foreign_keys(
    transaction: &Transaction<'_>,
    source: &str,
    destination: &str,
    quoted_source: &str,
) -> Result<usize> {
    let rows = transaction
        .query(
            "SELECT t.relname, con.conname, pg_catalog.pg_get_constraintdef(con.oid)
             FROM pg_catalog.pg_constraint con
             JOIN pg_catalog.pg_class t ON t.oid = con.conrelid
             JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
             WHERE con.contype = 'f'
               AND con.conparentid = 0
               AND n.nspname = $1
             ORDER BY t.relname, con.conname",
            &[&source],
        )
        .await
        .with_context(|| format!("Failed to list foreign keys of schema '{}'", source))?;

    for row in &rows {
        let table: String = row.get(0);
        let name: String = row.get(1);
        let definition: String = row.get(2);
        let definition = retarget_schema(&definition, quoted_source, destination);

        transaction
            .batch_execute(&format!(
                "ALTER TABLE {} ADD CONSTRAINT {} {}",
                qualified_table(destination, &table),
                quote_ident(&name),
                definition
            ))
            .await
            .with_context(|| format!("Failed to recreate foreign key '{}' on '{}'", name, table))?;
    }

    Ok(rows.len())
}

/// Point `source.` qualifiers in a catalog definition at `destination`
///
/// `quoted_source` is the schema name as the catalog prints it. Qualifiers of
/// other schemas and text inside string literals are kept as they are.
pub fn retarget_schema(definition: &str, quoted_source: &str, destination: &str) -> String {
    let pattern = format!("{}.", quoted_source);
    let replacement = format!("{}.", quote_ident(destination));

    let mut retargeted = String::with_capacity(definition.len());
    let mut rest = definition;
    let mut in_literal = false;
    let mut previous: Option<char> = None;

    while let Some(c) = rest.chars().next() {
        let at_boundary = previous.map(|p| !is_name_char(p)).unwrap_or(true);
        if !in_literal && at_boundary && rest.starts_with(&pattern) {
            retargeted.push_str(&replacement);
            rest = &rest[pattern.len()..];
            previous = Some('.');
            continue;
        }
        if c == '\'' {
            in_literal = !in_literal;
        }
        retargeted.push(c);
        previous = Some(c);
        rest = &rest[c.len_utf8()..];
    }

    retargeted
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '"' | '.')
}
