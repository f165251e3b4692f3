//! Write planning integration tests

use ermpath::catalog::{AccessContext, Client, ColumnRow, ForeignKeyRow, Introspection, KeyRow, Model, TableRow};
use ermpath::compiler::Compiler;
use ermpath::error::ErmError;
use ermpath::path::ast::{ElementInput, FilterExpr, Name, Operator, PathItem};
use ermpath::path::{EntityPath, Resolver};
use ermpath::write::{
    affected_tables, plan_attribute_delete, plan_attribute_update, plan_entity_delete, plan_upsert, split_columns,
    Batch, Flag, InputFormat, Statement, UpsertOptions,
};
use serde_json::json;

/// Category <- T with an owner column gating updates and deletes per row
fn test_model() -> Model {
    Introspection::new("1", 1)
        .acls(json!({"enumerate": ["*"], "select": ["*"]}))
        .schema("S")
        .table(TableRow::new("S", "Category").acls(json!({"insert": ["*"], "update": ["*"], "delete": ["*"]})))
        .column(ColumnRow::new("S", "Category", "id", "int8").nullable(false))
        .column(ColumnRow::new("S", "Category", "label", "text"))
        .key(KeyRow::new("S", "Category_pkey", "S", "Category", ["id"]))
        .table(
            TableRow::new("S", "T")
                .acls(json!({"insert": ["*"]}))
                .acl_bindings(json!({"own": {"types": ["update", "delete"], "projection": "owner"}})),
        )
        .column(ColumnRow::new("S", "T", "id", "int8").nullable(false))
        .column(ColumnRow::new("S", "T", "name", "text"))
        .column(ColumnRow::new("S", "T", "owner", "text"))
        .column(ColumnRow::new("S", "T", "cat_id", "int8"))
        .key(KeyRow::new("S", "T_pkey", "S", "T", ["id"]))
        .key(KeyRow::new("S", "T_name_key", "S", "T", ["name"]))
        .fkey(ForeignKeyRow::new("S", "T_cat_fkey", "S", "T", ["cat_id"], "S", "Category", ["id"]))
        .build()
        .unwrap()
}

fn resolve(access: &AccessContext<'_>, items: &[PathItem]) -> EntityPath {
    Resolver::new(access).resolve(items).unwrap()
}

fn table(name: &str) -> Vec<PathItem> {
    vec![PathItem::Element(ElementInput::table(name))]
}

fn csv(text: &str) -> Batch {
    Batch::parse(InputFormat::from_content_type("text/csv").unwrap(), text.as_bytes()).unwrap()
}

// ============================================================================
// Upsert
// ============================================================================

#[test]
fn test_upsert_plan_is_state_independent() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("u1"));
    let path = resolve(&access, &table("Category"));
    let input = csv("id,label\n1,a\n2,b\n");
    let first = plan_upsert(&access, &path, &input, UpsertOptions::default()).unwrap();
    let second = plan_upsert(&access, &path, &input, UpsertOptions::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_duplicate_key_guard_precedes_mutation() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("u1"));
    let path = resolve(&access, &table("Category"));
    let plan = plan_upsert(&access, &path, &csv("id,label\n1,a\n"), UpsertOptions::default()).unwrap();

    let unique = plan
        .statements
        .iter()
        .position(|s| matches!(s, Statement::Unique { .. }))
        .unwrap();
    assert!(Some(unique) < plan.first_mutation());
    assert!(matches!(
        &plan.statements[unique],
        Statement::Unique { on_violation: ErmError::ConflictData(msg), .. } if msg.contains("same unique key")
    ));
    assert_eq!(plan.statements.last().map(|s| s.sql()), Some("DROP TABLE \"_ermpath_input\""));
}

#[test]
fn test_split_columns_by_key() {
    let m = test_model();
    let t = m.table_by_name("S", "T").unwrap().id;
    let input = csv("id,name,cat_id\n1,a,10\n");
    let cols = input.resolve_columns(&m, t).unwrap();
    let (keys, values) = split_columns(&m, t, &cols);
    let names = |cols: &[ermpath::catalog::ColumnId]| -> Vec<String> {
        cols.iter().map(|c| m.column(*c).name.clone()).collect()
    };
    assert_eq!(names(&keys), vec!["id", "name"]);
    assert_eq!(names(&values), vec!["cat_id"]);
}

#[test]
fn test_skip_flags_drop_mutations() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("u1"));
    let path = resolve(&access, &table("Category"));
    let plan = plan_upsert(
        &access,
        &path,
        &csv("id,label\n1,a\n"),
        UpsertOptions::new(Flag::Skip, Flag::True),
    )
    .unwrap();
    assert!(!plan.statements.iter().any(|s| s.sql().starts_with("UPDATE")));
    assert!(plan.statements.iter().any(|s| s.sql().starts_with("INSERT INTO")));

    let plan = plan_upsert(
        &access,
        &path,
        &csv("id,label\n1,a\n"),
        UpsertOptions::new(Flag::True, Flag::False),
    )
    .unwrap();
    assert!(!plan.statements.iter().any(|s| s.sql().starts_with("INSERT INTO")));
    assert!(plan.guards().any(|g| matches!(
        g,
        Statement::Guard { on_rows: ErmError::ConflictData(msg), .. } if msg.contains("does not match")
    )));
}

#[test]
fn test_dynamic_update_right_guards_matched_rows() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("u1"));
    let path = resolve(&access, &table("T"));
    let plan = plan_upsert(&access, &path, &csv("id,cat_id\n1,10\n"), UpsertOptions::default()).unwrap();
    let guard = plan
        .guards()
        .find(|g| g.sql().contains("\"owner\""))
        .unwrap();
    assert!(guard.sql().contains("COALESCE(NOT (t.\"owner\" = ANY (ARRAY['*','u1']::text[])), True)"));
    assert!(matches!(guard, Statement::Guard { on_rows: ErmError::Forbidden(_), .. }));
}

#[test]
fn test_unknown_input_column() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("u1"));
    let path = resolve(&access, &table("Category"));
    let r = plan_upsert(&access, &path, &csv("id,nope\n1,a\n"), UpsertOptions::default());
    assert!(matches!(r, Err(ErmError::ConflictModel(_))));
}

#[test]
fn test_attribute_update_targets() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("u1"));
    let path = resolve(&access, &table("Category"));
    let input = csv("id,label\n1,x\n");
    let plan = plan_attribute_update(&access, &path, &input, &["id".to_string()], &["label".to_string()]).unwrap();
    assert!(plan
        .statements
        .iter()
        .any(|s| s.sql().starts_with("UPDATE \"S\".\"Category\" t SET \"label\" = i.\"label\"")));
    assert!(matches!(
        plan_attribute_update(&access, &path, &input, &["id".to_string()], &["id".to_string()]),
        Err(ErmError::BadSyntax(_))
    ));
    assert!(matches!(
        plan_attribute_update(&access, &path, &input, &[], &["label".to_string()]),
        Err(ErmError::BadSyntax(_))
    ));
}

// ============================================================================
// Delete
// ============================================================================

#[test]
fn test_delete_under_dynamic_acl() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("u1"));
    let path = resolve(
        &access,
        &[
            PathItem::Element(ElementInput::table("T")),
            PathItem::Filter(FilterExpr::compare("cat_id", Operator::Eq, "10")),
        ],
    );
    let compiler = Compiler::new(Resolver::new(&access));
    let plan = plan_entity_delete(&compiler, &path).unwrap();
    let kinds: Vec<&str> = plan.statements.iter().map(|s| s.kind()).collect();
    assert_eq!(kinds, vec!["exec", "expect", "guard", "returning", "exec"]);
    assert!(matches!(
        &plan.statements[1],
        Statement::ExpectRows { on_empty: ErmError::NotFound(_), .. }
    ));
}

#[test]
fn test_delete_denied_for_anonymous() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::anonymous());
    let path = resolve(&access, &table("Category"));
    let compiler = Compiler::new(Resolver::new(&access));
    assert!(matches!(
        plan_entity_delete(&compiler, &path),
        Err(ErmError::Unauthorized(_))
    ));
}

#[test]
fn test_attribute_delete_nulls_column() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("u1"));
    let path = resolve(&access, &table("Category"));
    let compiler = Compiler::new(Resolver::new(&access));
    let plan = plan_attribute_delete(&compiler, &path, &[Name::from("label")]).unwrap();
    assert!(plan
        .statements
        .iter()
        .any(|s| s.sql().starts_with("UPDATE \"S\".\"Category\" AS t SET \"label\" = NULL")));
}

// ============================================================================
// Notification
// ============================================================================

#[test]
fn test_category_change_reaches_referers() {
    let m = test_model();
    let cat = m.table_by_name("S", "Category").unwrap().id;
    let t = m.table_by_name("S", "T").unwrap().id;
    assert_eq!(affected_tables(&m, cat), vec![cat, t]);
    assert_eq!(affected_tables(&m, t), vec![t]);
}
