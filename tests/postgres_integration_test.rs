// ABOUTME: Integration tests for backup, export/import and the loader against PostgreSQL
// ABOUTME: Requires TEST_DATABASE_URL; every test works in its own throwaway schema

use serde_json::json;
use std::env;
use webapp_dba::commands;
use webapp_dba::config::DbaConfig;
use webapp_dba::error::{kind, DbaError};
use webapp_dba::loader::{self, LoaderSettings};
use webapp_dba::postgres::connect;
use webapp_dba::schema;
use webapp_dba::serializer::{self, Format};
use webapp_dba::session::Session;

fn get_test_database_url() -> Option<String> {
    env::var("TEST_DATABASE_URL").ok()
}

/// Create `schema` from `ddl`, where `{s}` stands for the schema name, and
/// open a session on it
async fn setup_tables(schema: &str, ddl: &str) -> anyhow::Result<Session> {
    let url = get_test_database_url().expect("TEST_DATABASE_URL must be set");
    let admin = connect(&url).await?;
    admin
        .batch_execute(&format!(
            "DROP SCHEMA IF EXISTS {s} CASCADE; CREATE SCHEMA {s};",
            s = schema
        ))
        .await?;
    admin.batch_execute(&ddl.replace("{s}", schema)).await?;

    let config = DbaConfig::default().with_overrides(Some(url.clone()), Some(schema.to_string()));
    Session::with_client(connect(&url).await?, &config).await
}

/// Create `schema` with users/orders tables and a version table, and open a
/// session on it
async fn setup_schema(schema: &str) -> anyhow::Result<Session> {
    setup_tables(
        schema,
        r#"CREATE TABLE {s}.users (
               id serial PRIMARY KEY,
               name text NOT NULL,
               email text UNIQUE
           );
           CREATE TABLE {s}.orders (
               id serial PRIMARY KEY,
               "user" integer NOT NULL REFERENCES {s}.users(id),
               quantity integer NOT NULL DEFAULT 1
           );
           CREATE TABLE {s}.alembic_version (version_num varchar(32) PRIMARY KEY);
           INSERT INTO {s}.alembic_version VALUES ('ae1027a6acf');"#,
    )
    .await
}

async fn drop_schemas(schemas: &[&str]) {
    let url = get_test_database_url().expect("TEST_DATABASE_URL must be set");
    let admin = connect(&url).await.expect("connect for cleanup");
    for schema in schemas {
        let _ = admin
            .batch_execute(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema))
            .await;
    }
}

async fn count(session: &Session, table: &str) -> i64 {
    session
        .client()
        .query_one(
            &format!("SELECT count(*) FROM {}.{}", session.schema(), table),
            &[],
        )
        .await
        .expect("count rows")
        .get(0)
}

async fn insert_users(session: &Session) {
    session
        .client()
        .batch_execute(&format!(
            "INSERT INTO {s}.users (name, email) VALUES ('Alice', 'a@b.com'), ('Bob', 'bob@b.com');
             INSERT INTO {s}.orders (\"user\", quantity) VALUES (1, 3), (2, 1);",
            s = session.schema()
        ))
        .await
        .expect("insert fixtures");
}

#[tokio::test]
#[ignore]
async fn test_copy_schema_replaces_destination() {
    let mut session = setup_schema("dba_it_copy").await.unwrap();
    insert_users(&session).await;

    let first = schema::copy_schema(session.client_mut(), "dba_it_copy", "dba_it_copy_bak")
        .await
        .unwrap();
    assert_eq!(first.tables, 3);
    assert_eq!(first.rows, 5);
    assert_eq!(first.foreign_keys, 1);

    // Change the source, copy again: the backup must match the new content
    session
        .client()
        .batch_execute("DELETE FROM dba_it_copy.orders WHERE id = 2")
        .await
        .unwrap();
    let second = schema::copy_schema(session.client_mut(), "dba_it_copy", "dba_it_copy_bak")
        .await
        .unwrap();
    assert_eq!(second.rows, 4);

    let orders: i64 = session
        .client()
        .query_one("SELECT count(*) FROM dba_it_copy_bak.orders", &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!(orders, 1);

    // The copied serial keeps counting from the source's position
    let next_id: i32 = session
        .client()
        .query_one(
            "INSERT INTO dba_it_copy_bak.users (name) VALUES ('Carol') RETURNING id",
            &[],
        )
        .await
        .unwrap()
        .get(0);
    assert_eq!(next_id, 3);

    // Foreign keys point at the backup tables
    let result = session
        .client()
        .batch_execute("INSERT INTO dba_it_copy_bak.orders (\"user\") VALUES (99)")
        .await;
    assert!(result.is_err());

    let schemas = schema::list_schemas(session.client()).await.unwrap();
    assert!(schemas.contains(&"dba_it_copy_bak".to_string()));

    drop_schemas(&["dba_it_copy", "dba_it_copy_bak"]).await;
}

#[tokio::test]
#[ignore]
async fn test_copy_schema_missing_source() {
    let mut session = setup_schema("dba_it_missing").await.unwrap();

    let err = schema::copy_schema(session.client_mut(), "dba_it_no_such_schema", "dba_it_missing_bak")
        .await
        .unwrap_err();
    assert!(matches!(kind(&err), Some(DbaError::SchemaNotFound(_))));

    drop_schemas(&["dba_it_missing"]).await;
}

#[tokio::test]
#[ignore]
async fn test_current_version() {
    let session = setup_schema("dba_it_version").await.unwrap();

    let version =
        schema::current_version(session.client(), session.schema(), session.versioning())
            .await
            .unwrap();
    assert_eq!(version, "ae1027a6acf");
    assert!(session.model("alembic_version").is_none());

    drop_schemas(&["dba_it_version"]).await;
}

#[tokio::test]
#[ignore]
async fn test_get_reference_requires_exactly_one_match() {
    let session = setup_schema("dba_it_reference").await.unwrap();
    session
        .client()
        .batch_execute(
            "INSERT INTO dba_it_reference.users (name, email) VALUES
                 ('Alice', 'a@b.com'), ('Sam', 'sam1@b.com'), ('Sam', 'sam2@b.com')",
        )
        .await
        .unwrap();
    let settings = LoaderSettings::default();

    let identity = loader::get_reference(
        session.client(),
        session.models(),
        &settings,
        "users",
        &json!("email"),
        &json!("a@b.com"),
    )
    .await
    .unwrap();
    assert_eq!(identity, json!(1));

    for (name, expected) in [("Nobody", 0), ("Sam", 2)] {
        let err = loader::get_reference(
            session.client(),
            session.models(),
            &settings,
            "users",
            &json!("name"),
            &json!(name),
        )
        .await
        .unwrap_err();
        match kind(&err) {
            Some(DbaError::AmbiguousOrMissingReference { count, .. }) => {
                assert_eq!(*count, expected)
            }
            other => panic!("unexpected error kind: {:?}", other),
        }
    }

    let err = loader::get_reference(
        session.client(),
        session.models(),
        &settings,
        "ghosts",
        &json!("name"),
        &json!("Sam"),
    )
    .await
    .unwrap_err();
    assert!(matches!(kind(&err), Some(DbaError::UnknownTable(_))));

    drop_schemas(&["dba_it_reference"]).await;
}

#[tokio::test]
#[ignore]
async fn test_loader_resolves_references() {
    let mut session = setup_schema("dba_it_loader").await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seed.yaml");
    std::fs::write(
        &path,
        "__settings__:\n\
         \x20 options:\n\
         \x20   fieldname: lower\n\
         users:\n\
         - Name: Alice\n\
         \x20 Email: a@b.com\n\
         orders:\n\
         - user: [users, email, a@b.com]\n\
         \x20 quantity: 2\n\
         - user: {table: users, fields: {name: Bob, email: bob@b.com}}\n\
         - user: [users, 1]\n\
         \x20 quantity: null\n\
         ghosts:\n\
         - name: Casper\n",
    )
    .unwrap();

    let base = dir.path().join("seed");
    let summary = loader::load(&mut session, Format::Yaml, base.to_str().unwrap())
        .await
        .unwrap();
    assert_eq!(summary.inserted["users"], 2);
    assert_eq!(summary.inserted["orders"], 3);

    let rows = session
        .client()
        .query(
            "SELECT o.\"user\", u.email, o.quantity
             FROM dba_it_loader.orders o JOIN dba_it_loader.users u ON u.id = o.\"user\"
             ORDER BY o.id",
            &[],
        )
        .await
        .unwrap();
    let orders: Vec<(i32, String, i32)> = rows
        .iter()
        .map(|r| (r.get(0), r.get(1), r.get(2)))
        .collect();
    assert_eq!(
        orders,
        vec![
            (1, "a@b.com".to_string(), 2),
            (2, "bob@b.com".to_string(), 1),
            (1, "a@b.com".to_string(), 1),
        ]
    );

    drop_schemas(&["dba_it_loader"]).await;
}

#[tokio::test]
#[ignore]
async fn test_loader_keeps_rows_before_failure() {
    let mut session = setup_schema("dba_it_loader_fail").await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seed.json");
    std::fs::write(
        &path,
        r#"{
            "users": [{"name": "Alice", "email": "a@b.com"}],
            "orders": [{"user": ["users", "email", "nobody@b.com"]}]
        }"#,
    )
    .unwrap();

    let err = loader::load(&mut session, Format::Json, path.to_str().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        kind(&err),
        Some(DbaError::AmbiguousOrMissingReference { count: 0, .. })
    ));
    assert_eq!(count(&session, "users").await, 1);
    assert_eq!(count(&session, "orders").await, 0);

    drop_schemas(&["dba_it_loader_fail"]).await;
}

#[tokio::test]
#[ignore]
async fn test_export_import_yaml_round_trip() {
    let mut session = setup_schema("dba_it_yaml").await.unwrap();
    insert_users(&session).await;
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("dump");
    let base = base.to_str().unwrap();

    let exported = serializer::export(&session, Format::Yaml, base, None)
        .await
        .unwrap();
    assert_eq!(exported.tables, 2);
    assert_eq!(exported.records, 4);
    assert!(dir.path().join("dump.yaml").is_file());

    session
        .client()
        .batch_execute("TRUNCATE dba_it_yaml.orders, dba_it_yaml.users")
        .await
        .unwrap();

    let imported = serializer::import(&mut session, Format::Yaml, base, None)
        .await
        .unwrap();
    assert_eq!(imported.inserted, 4);

    let users: Vec<(i32, String)> = session
        .client()
        .query("SELECT id, name FROM dba_it_yaml.users ORDER BY id", &[])
        .await
        .unwrap()
        .iter()
        .map(|r| (r.get(0), r.get(1)))
        .collect();
    assert_eq!(users, vec![(1, "Alice".to_string()), (2, "Bob".to_string())]);

    drop_schemas(&["dba_it_yaml"]).await;
}

#[tokio::test]
#[ignore]
async fn test_export_import_csv_per_table() {
    let mut session = setup_schema("dba_it_csv").await.unwrap();
    insert_users(&session).await;
    let dir = tempfile::tempdir().unwrap();
    let filename = dir.path().join("out.csv");

    serializer::export(&session, Format::Csv, filename.to_str().unwrap(), Some("users"))
        .await
        .unwrap();

    let content = std::fs::read_to_string(dir.path().join("out-users.csv")).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(
        lines,
        vec!["id;name;email", "1;Alice;a@b.com", "2;Bob;bob@b.com"]
    );
    assert!(!dir.path().join("out-orders.csv").exists());

    session
        .client()
        .batch_execute("TRUNCATE dba_it_csv.orders, dba_it_csv.users")
        .await
        .unwrap();

    let imported = serializer::import(
        &mut session,
        Format::Csv,
        dir.path().join("out-users.csv").to_str().unwrap(),
        None,
    )
    .await
    .unwrap();
    assert_eq!(imported.inserted, 2);
    assert_eq!(count(&session, "users").await, 2);

    drop_schemas(&["dba_it_csv"]).await;
}

#[tokio::test]
#[ignore]
async fn test_sql_import_continues_after_bad_statements() {
    let mut session = setup_schema("dba_it_sql").await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.sql");
    std::fs::write(
        &path,
        "-- TABLE users\n\
         INSERT INTO \"users\" (\"id\", \"name\", \"email\") VALUES (1, 'Alice', 'a@b.com');\n\
         INSERT INTO \"users\" (\"name\") SELECT 'Nobody' WHERE false;\n\
         INSERT INTO \"users\" (\"id\", \"name\", \"email\") VALUES (1, 'Dup', 'dup@b.com');\n\
         INSERT INTO \"users\" (\"id\", \"name\", \"email\") VALUES (2, E'Bob\\nSmith', 'bob@b.com');\n",
    )
    .unwrap();

    let summary = serializer::import(&mut session, Format::Sql, path.to_str().unwrap(), None)
        .await
        .unwrap();
    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.failed, 2);

    let name: String = session
        .client()
        .query_one("SELECT name FROM dba_it_sql.users WHERE id = 2", &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!(name, "Bob\nSmith");

    drop_schemas(&["dba_it_sql"]).await;
}

#[tokio::test]
#[ignore]
async fn test_import_missing_file() {
    let mut session = setup_schema("dba_it_missing_file").await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("absent");

    let err = serializer::import(&mut session, Format::Json, base.to_str().unwrap(), None)
        .await
        .unwrap_err();
    assert!(matches!(kind(&err), Some(DbaError::MissingFile(_))));

    drop_schemas(&["dba_it_missing_file"]).await;
}

/// Rows of a table as text columns, for comparing before and after a round trip
async fn snapshot(session: &Session, query: &str) -> Vec<Vec<Option<String>>> {
    session
        .client()
        .query(query, &[])
        .await
        .expect("snapshot query")
        .iter()
        .map(|row| (0..row.len()).map(|i| row.get(i)).collect())
        .collect()
}

#[tokio::test]
#[ignore]
async fn test_numeric_precision_survives_json_round_trip() {
    let mut session = setup_tables(
        "dba_it_numeric",
        "CREATE TABLE {s}.amounts (
             id serial PRIMARY KEY,
             amount numeric(30, 10) NOT NULL,
             rates numeric[]
         );
         INSERT INTO {s}.amounts (amount, rates) VALUES
             (12345678901234567890.0123456789, '{1.10,2.000000000000000001}');",
    )
    .await
    .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("dump");
    let base = base.to_str().unwrap();

    serializer::export(&session, Format::Json, base, None)
        .await
        .unwrap();
    let content = std::fs::read_to_string(dir.path().join("dump.json")).unwrap();
    assert!(content.contains("\"12345678901234567890.0123456789\""), "{}", content);

    session
        .client()
        .batch_execute("TRUNCATE dba_it_numeric.amounts")
        .await
        .unwrap();
    let imported = serializer::import(&mut session, Format::Json, base, None)
        .await
        .unwrap();
    assert_eq!(imported.inserted, 1);

    let rows = snapshot(
        &session,
        "SELECT amount::text, rates::text FROM dba_it_numeric.amounts",
    )
    .await;
    assert_eq!(
        rows,
        vec![vec![
            Some("12345678901234567890.0123456789".to_string()),
            Some("{1.10,2.000000000000000001}".to_string()),
        ]]
    );

    drop_schemas(&["dba_it_numeric"]).await;
}

#[tokio::test]
#[ignore]
async fn test_csv_round_trip_json_and_array_columns() {
    let mut session = setup_tables(
        "dba_it_csv_typed",
        r#"CREATE TABLE {s}.settings (
               id serial PRIMARY KEY,
               payload jsonb,
               tags text[]
           );
           INSERT INTO {s}.settings (payload, tags) VALUES
               ('{"a": 1}', '{x,"y z"}'),
               ('"dark"', NULL);"#,
    )
    .await
    .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let filename = dir.path().join("out.csv");
    let query = "SELECT id::text, jsonb_typeof(payload), payload::text, tags::text
                 FROM dba_it_csv_typed.settings ORDER BY id";
    let before = snapshot(&session, query).await;

    serializer::export(&session, Format::Csv, filename.to_str().unwrap(), Some("settings"))
        .await
        .unwrap();
    session
        .client()
        .batch_execute("TRUNCATE dba_it_csv_typed.settings")
        .await
        .unwrap();
    let imported = serializer::import(
        &mut session,
        Format::Csv,
        dir.path().join("out-settings.csv").to_str().unwrap(),
        None,
    )
    .await
    .unwrap();
    assert_eq!(imported.inserted, 2);

    let after = snapshot(&session, query).await;
    assert_eq!(after, before);
    assert_eq!(after[0][1].as_deref(), Some("object"));
    assert_eq!(after[1][1].as_deref(), Some("string"));
    assert_eq!(after[0][3].as_deref(), Some("{x,\"y z\"}"));

    drop_schemas(&["dba_it_csv_typed"]).await;
}

const TYPED_SCHEMA: &str = "CREATE TYPE {s}.mood AS ENUM ('sad', 'ok', 'happy');
     CREATE DOMAIN {s}.positive AS integer CHECK (VALUE > 0);
     CREATE TYPE {s}.address AS (street text, mood {s}.mood);
     CREATE TABLE {s}.people (
         id serial PRIMARY KEY,
         name text NOT NULL,
         mood {s}.mood NOT NULL DEFAULT 'ok',
         moods {s}.mood[],
         score {s}.positive,
         home {s}.address
     );
     INSERT INTO {s}.people (name, mood, moods, score, home) VALUES
         ('Alice', 'happy', '{sad,happy}', 3, '(\"Main St\",ok)');
     INSERT INTO {s}.people (name) VALUES ('Bob');";

async fn type_schema_of(session: &Session, table: &str, column: &str) -> String {
    session
        .client()
        .query_one(
            "SELECT tn.nspname::text
             FROM pg_catalog.pg_attribute a
             JOIN pg_catalog.pg_type t ON t.oid = a.atttypid
             JOIN pg_catalog.pg_namespace tn ON tn.oid = t.typnamespace
             WHERE a.attrelid = $1::text::regclass AND a.attname = $2",
            &[&table, &column],
        )
        .await
        .expect("column type schema")
        .get(0)
}

#[tokio::test]
#[ignore]
async fn test_backup_and_restore_user_defined_types() {
    let mut session = setup_tables("dba_it_types", TYPED_SCHEMA).await.unwrap();
    let query = "SELECT name, mood::text, moods::text, score::text, (home).street
                 FROM dba_it_types.people ORDER BY id";
    let before = snapshot(&session, query).await;

    let summary = schema::copy_schema(session.client_mut(), "dba_it_types", "dba_it_types_bak")
        .await
        .unwrap();
    assert_eq!(summary.types, 3);
    assert_eq!(summary.rows, 2);
    assert_eq!(
        type_schema_of(&session, "dba_it_types_bak.people", "mood").await,
        "dba_it_types_bak"
    );
    assert_eq!(
        type_schema_of(&session, "dba_it_types_bak.people", "home").await,
        "dba_it_types_bak"
    );

    session
        .client()
        .batch_execute(
            "DELETE FROM dba_it_types.people WHERE name = 'Bob';
             UPDATE dba_it_types.people SET mood = 'sad'",
        )
        .await
        .unwrap();

    commands::restore(&mut session, false, None, Some("dba_it_types_bak"), true)
        .await
        .unwrap();

    assert_eq!(snapshot(&session, query).await, before);
    assert_eq!(
        type_schema_of(&session, "dba_it_types.people", "moods").await,
        "dba_it_types"
    );
    assert_eq!(count(&session, "people").await, 2);

    // The backup's columns survive the restore dropping the original schema
    let backup_rows: i64 = session
        .client()
        .query_one("SELECT count(*) FROM dba_it_types_bak.people", &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!(backup_rows, 2);

    // Defaults, domain checks and the sequence work in the restored schema
    let row = session
        .client()
        .query_one(
            "INSERT INTO dba_it_types.people (name) VALUES ('Carol') RETURNING id, mood::text",
            &[],
        )
        .await
        .unwrap();
    assert_eq!((row.get::<_, i32>(0), row.get::<_, String>(1)), (3, "ok".to_string()));
    let negative = session
        .client()
        .batch_execute("INSERT INTO dba_it_types.people (name, score) VALUES ('Dan', -1)")
        .await;
    assert!(negative.is_err());

    drop_schemas(&["dba_it_types_bak", "dba_it_types"]).await;
}

#[tokio::test]
#[ignore]
async fn test_copy_refuses_to_drop_types_in_use() {
    let mut session = setup_tables("dba_it_shared_types", TYPED_SCHEMA).await.unwrap();
    session
        .client()
        .batch_execute(
            "DROP SCHEMA IF EXISTS dba_it_type_user CASCADE;
             CREATE SCHEMA dba_it_type_user;
             CREATE TABLE dba_it_type_user.visits (id serial PRIMARY KEY, mood dba_it_shared_types.mood);",
        )
        .await
        .unwrap();

    let err = schema::copy_schema(session.client_mut(), "dba_it_type_user", "dba_it_shared_types")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("visits.mood"), "{}", err);
    assert_eq!(count(&session, "people").await, 2);

    drop_schemas(&["dba_it_type_user", "dba_it_shared_types"]).await;
}

#[tokio::test]
#[ignore]
async fn test_partitioned_table_copied_once() {
    let mut session = setup_tables(
        "dba_it_parts",
        "CREATE TABLE {s}.events (
             id integer NOT NULL,
             happened date NOT NULL,
             note text,
             PRIMARY KEY (id, happened)
         ) PARTITION BY RANGE (happened);
         CREATE TABLE {s}.events_2023 PARTITION OF {s}.events
             FOR VALUES FROM ('2023-01-01') TO ('2024-01-01');
         CREATE TABLE {s}.events_2024 PARTITION OF {s}.events
             FOR VALUES FROM ('2024-01-01') TO ('2025-01-01');
         INSERT INTO {s}.events VALUES
             (1, '2023-05-01', 'a'), (2, '2024-02-01', 'b'), (3, '2024-03-01', 'c');",
    )
    .await
    .unwrap();
    assert_eq!(session.models().table_names(), ["events".to_string()]);

    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("dump");
    let exported = serializer::export(&session, Format::Json, base.to_str().unwrap(), None)
        .await
        .unwrap();
    assert_eq!(exported.tables, 1);
    assert_eq!(exported.records, 3);

    let summary = schema::copy_schema(session.client_mut(), "dba_it_parts", "dba_it_parts_bak")
        .await
        .unwrap();
    assert_eq!(summary.tables, 1);
    assert_eq!(summary.partitions, 2);
    assert_eq!(summary.rows, 3);

    let counts = snapshot(
        &session,
        "SELECT (SELECT count(*) FROM dba_it_parts_bak.events)::text,
                (SELECT count(*) FROM dba_it_parts_bak.events_2024)::text,
                (SELECT relispartition FROM pg_catalog.pg_class
                 WHERE oid = 'dba_it_parts_bak.events_2024'::regclass)::text",
    )
    .await;
    assert_eq!(
        counts,
        vec![vec![
            Some("3".to_string()),
            Some("2".to_string()),
            Some("true".to_string()),
        ]]
    );

    drop_schemas(&["dba_it_parts", "dba_it_parts_bak"]).await;
}

#[tokio::test]
#[ignore]
async fn test_restore_missing_target_fails_without_copying() {
    let mut session = setup_schema("dba_it_restore").await.unwrap();
    insert_users(&session).await;

    let err = commands::restore(&mut session, false, Some("nope"), None, true)
        .await
        .unwrap_err();
    match kind(&err) {
        Some(DbaError::InvalidRestoreTarget { schema }) => {
            assert_eq!(schema, "dba_it_restore_nope")
        }
        other => panic!("unexpected error kind: {:?}", other),
    }
    assert_eq!(count(&session, "users").await, 2);
    assert_eq!(count(&session, "orders").await, 2);

    drop_schemas(&["dba_it_restore"]).await;
}

#[tokio::test]
#[ignore]
async fn test_loader_reference_without_field() {
    let mut session = setup_schema("dba_it_loader_ref").await.unwrap();
    let dir = tempfile::tempdir().unwrap();

    for (file, document) in [
        (
            "table_only.json",
            r#"{"users": [{"name": "Alice"}], "orders": [{"user": {"table": "users"}}]}"#,
        ),
        ("empty.json", r#"{"orders": [{"user": {}}]}"#),
    ] {
        let path = dir.path().join(file);
        std::fs::write(&path, document).unwrap();

        let err = loader::load(&mut session, Format::Json, path.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(
            matches!(
                kind(&err),
                Some(DbaError::MissingReferenceField { table, field })
                    if table == "orders" && field == "user"
            ),
            "{}: {}",
            file,
            err
        );
    }
    assert_eq!(count(&session, "users").await, 1);
    assert_eq!(count(&session, "orders").await, 0);

    drop_schemas(&["dba_it_loader_ref"]).await;
}

#[tokio::test]
#[ignore]
async fn test_export_import_json_round_trip() {
    let mut session = setup_schema("dba_it_json").await.unwrap();
    insert_users(&session).await;
    session
        .client()
        .batch_execute("UPDATE dba_it_json.users SET name = E'Bob\\nSmith' WHERE id = 2")
        .await
        .unwrap();
    let query = "SELECT u.id::text, u.name, u.email, o.quantity::text
                 FROM dba_it_json.users u
                 LEFT JOIN dba_it_json.orders o ON o.\"user\" = u.id
                 ORDER BY u.id";
    let before = snapshot(&session, query).await;
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("dump");
    let base = base.to_str().unwrap();

    let exported = serializer::export(&session, Format::Json, base, None)
        .await
        .unwrap();
    assert_eq!(exported.records, 4);

    session
        .client()
        .batch_execute("TRUNCATE dba_it_json.orders, dba_it_json.users")
        .await
        .unwrap();
    let imported = serializer::import(&mut session, Format::Json, base, None)
        .await
        .unwrap();
    assert_eq!(imported.inserted, 4);

    assert_eq!(snapshot(&session, query).await, before);
    assert_eq!(before[1][1].as_deref(), Some("Bob\nSmith"));

    drop_schemas(&["dba_it_json"]).await;
}

#[tokio::test]
#[ignore]
async fn test_export_import_sql_round_trip() {
    let mut session = setup_tables(
        "dba_it_sql_trip",
        r#"CREATE TABLE {s}.notes (
               id serial PRIMARY KEY,
               body text NOT NULL,
               tags text[],
               meta jsonb,
               amount numeric(20, 8)
           );
           INSERT INTO {s}.notes (body, tags, meta, amount) VALUES
               (E'line one\nit''s line two', '{a,"b c","quo\"te",NULL}', '{"k": [1, 2]}', 0.12345678),
               ('plain', NULL, '"just text"', NULL);"#,
    )
    .await
    .unwrap();
    let query = "SELECT id::text, body, tags::text, meta::text, amount::text
                 FROM dba_it_sql_trip.notes ORDER BY id";
    let before = snapshot(&session, query).await;
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("dump");
    let base = base.to_str().unwrap();

    serializer::export(&session, Format::Sql, base, None)
        .await
        .unwrap();
    session
        .client()
        .batch_execute("TRUNCATE dba_it_sql_trip.notes")
        .await
        .unwrap();
    let imported = serializer::import(&mut session, Format::Sql, base, None)
        .await
        .unwrap();
    assert_eq!(imported.inserted, 2);
    assert_eq!(imported.failed, 0);

    assert_eq!(snapshot(&session, query).await, before);

    drop_schemas(&["dba_it_sql_trip"]).await;
}
