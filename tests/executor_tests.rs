//! Execution integration tests over the scripted backend

use std::sync::Arc;
use std::time::Duration;

use ermpath::catalog::{AccessContext, Client, ColumnRow, ForeignKeyRow, Introspection, KeyRow, Model, TableRow};
use ermpath::compiler::{Compiler, ReadRequest};
use ermpath::config::ServiceConfig;
use ermpath::error::ErmError;
use ermpath::executor::{run_read, run_write, BackendError, Datum, Pool, Reply, Row, ScriptedBackend};
use ermpath::path::ast::{ElementInput, FilterExpr, Operator, PathItem};
use ermpath::path::Resolver;
use ermpath::write::{plan_entity_delete, plan_upsert, Batch, ChangeRecorder, InputFormat, UpsertOptions};
use serde_json::{json, Value};

/// `T(id, name, cat_id -> Category.id, owner)`; rows are visible to their owner only
fn test_model() -> Model {
    Introspection::new("1", 1)
        .acls(json!({"enumerate": ["*"], "select": ["*"]}))
        .schema("S")
        .table(TableRow::new("S", "Category").acls(json!({"insert": ["*"], "update": ["*"]})))
        .column(ColumnRow::new("S", "Category", "id", "int8").nullable(false))
        .column(ColumnRow::new("S", "Category", "label", "text"))
        .key(KeyRow::new("S", "Category_pkey", "S", "Category", ["id"]))
        .table(
            TableRow::new("S", "T")
                .acls(json!({"select": []}))
                .acl_bindings(json!({"own": {"types": ["select", "delete"], "projection": "owner"}})),
        )
        .column(ColumnRow::new("S", "T", "id", "int8").nullable(false))
        .column(ColumnRow::new("S", "T", "name", "text"))
        .column(ColumnRow::new("S", "T", "cat_id", "int8"))
        .column(ColumnRow::new("S", "T", "owner", "text"))
        .key(KeyRow::new("S", "T_pkey", "S", "T", ["id"]))
        .fkey(ForeignKeyRow::new("S", "T_cat_fkey", "S", "T", ["cat_id"], "S", "Category", ["id"]))
        .build()
        .unwrap()
}

fn t_cat_10() -> Vec<PathItem> {
    vec![
        PathItem::Element(ElementInput::table("T")),
        PathItem::Filter(FilterExpr::compare("cat_id", Operator::Eq, "10")),
    ]
}

fn pool(script: &ScriptedBackend) -> Pool {
    Pool::new(Arc::new(script.clone()), 2, Duration::from_secs(60))
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_filtered_read_returns_matching_row() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("alice"));
    let resolver = Resolver::new(&access);
    let path = resolver.resolve(&t_cat_10()).unwrap();
    let query = Compiler::new(resolver).compile_read(&path, &ReadRequest::entity()).unwrap();
    assert!(!query.sql.contains("JOIN"));
    assert!(query.sql.contains("s.\"owner\" = ANY (ARRAY['*','alice']::text[])"));

    let script = ScriptedBackend::new().on(
        "t0.\"cat_id\" = 10",
        Reply::Rows(vec![Row::new(vec![
            Datum::Int(1),
            Datum::String("a".into()),
            Datum::Int(10),
            Datum::String("alice".into()),
        ])]),
    );
    let pool = pool(&script);
    let cursor = run_read(&pool, &query).await.unwrap();
    let columns = cursor.columns().to_vec();
    let rows = cursor.collect().await.unwrap();

    assert_eq!(rows.len(), 1);
    let obj = rows[0].to_object(&columns);
    assert_eq!(obj.get("id"), Some(&Value::from(1)));
    assert_eq!(obj.get("name"), Some(&Value::from("a")));
    assert_eq!(obj.get("cat_id"), Some(&Value::from(10)));
    assert_eq!(script.log()[0], "BEGIN ISOLATION LEVEL REPEATABLE READ");
    assert_eq!(script.log().last().map(String::as_str), Some("COMMIT"));
}

#[tokio::test]
async fn test_pool_reuses_sessions() {
    let script = ScriptedBackend::new();
    let pool = Pool::from_config(Arc::new(script.clone()), &ServiceConfig::default());
    for _ in 0..3 {
        let query = ermpath::compiler::CompiledQuery {
            sql: "SELECT 1".into(),
            columns: Vec::new(),
        };
        let rows = run_read(&pool, &query).await.unwrap().collect().await.unwrap();
        assert!(rows.is_empty());
    }
    assert_eq!(script.connects(), 1);
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn test_delete_hidden_rows_not_found() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("bob"));
    let compiler = Compiler::new(Resolver::new(&access));
    let path = compiler.resolver().resolve(&t_cat_10()).unwrap();
    let plan = plan_entity_delete(&compiler, &path).unwrap();
    // victims are drawn through the row-gated source
    assert!(plan.statements[0].sql().contains("s.\"owner\" = ANY (ARRAY['*','bob']::text[])"));

    // the gated source yields nothing for bob even though T has rows
    let script = ScriptedBackend::new().on(
        "SELECT count(*) FROM \"_ermpath_victims\"",
        Reply::Rows(vec![Row::new(vec![Datum::Int(0)])]),
    );
    let pool = pool(&script);
    let sink = ChangeRecorder::new();
    let err = run_write(&pool, &m, &plan, &sink).await.unwrap_err();

    assert!(matches!(err, ErmError::NotFound(_)));
    assert!(!script.log().iter().any(|s| s.starts_with("DELETE")));
    assert_eq!(script.log().last().map(String::as_str), Some("ROLLBACK"));
    assert!(sink.snapshot().is_empty());
}

#[tokio::test]
async fn test_delete_commits_and_notifies() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("alice"));
    let compiler = Compiler::new(Resolver::new(&access));
    let path = compiler.resolver().resolve(&t_cat_10()).unwrap();
    let plan = plan_entity_delete(&compiler, &path).unwrap();

    let script = ScriptedBackend::new()
        .on("SELECT count(*)", Reply::Rows(vec![Row::new(vec![Datum::Int(1)])]))
        .on(
            "DELETE FROM",
            Reply::Rows(vec![Row::new(vec![Datum::Int(1), Datum::String("a".into())])]),
        );
    let pool = pool(&script);
    let sink = ChangeRecorder::new();
    let outcome = run_write(&pool, &m, &plan, &sink).await.unwrap();

    assert_eq!(outcome.rows.len(), 1);
    let t = m.table_by_name("S", "T").unwrap().id;
    assert_eq!(sink.version(t), Some(outcome.version));
    assert_eq!(script.log()[0], "BEGIN ISOLATION LEVEL SERIALIZABLE");
    assert!(script.log().iter().any(|s| s == "DROP TABLE \"_ermpath_victims\""));
}

#[tokio::test]
async fn test_duplicate_input_keys_conflict() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("alice"));
    let path = Resolver::new(&access)
        .resolve(&[PathItem::Element(ElementInput::table("Category"))])
        .unwrap();
    let batch = Batch::parse(InputFormat::JsonArray, br#"[{"id": 1, "label": "a"}, {"id": 1, "label": "b"}]"#).unwrap();
    let plan = plan_upsert(&access, &path, &batch, UpsertOptions::default()).unwrap();

    let script = ScriptedBackend::new().on(
        "CREATE UNIQUE INDEX",
        Reply::Fail(BackendError::UniqueViolation("could not create unique index".into())),
    );
    let pool = pool(&script);
    let err = run_write(&pool, &m, &plan, &ChangeRecorder::new()).await.unwrap_err();
    assert!(matches!(err, ErmError::ConflictData(msg) if msg.contains("same unique key")));
    assert!(!script.log().iter().any(|s| s.starts_with("INSERT INTO \"S\"")));
}

#[tokio::test]
async fn test_backend_integrity_violation_is_conflict() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("alice"));
    let path = Resolver::new(&access)
        .resolve(&[PathItem::Element(ElementInput::table("Category"))])
        .unwrap();
    let batch = Batch::parse(InputFormat::JsonStream, b"{\"id\": 1, \"label\": null}\n").unwrap();
    let plan = plan_upsert(&access, &path, &batch, UpsertOptions::default()).unwrap();

    let script = ScriptedBackend::new().on(
        "INSERT INTO \"S\"",
        Reply::Fail(BackendError::Integrity("null value in column".into())),
    );
    let pool = pool(&script);
    let err = run_write(&pool, &m, &plan, &ChangeRecorder::new()).await.unwrap_err();
    assert_eq!(err, ErmError::ConflictData("input data violates model: null value in column".into()));
    assert_eq!(err.status(), 409);
}
