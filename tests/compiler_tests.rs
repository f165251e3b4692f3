//! Read compilation integration tests

use ermpath::catalog::{AccessContext, Client, ColumnRow, ForeignKeyRow, Introspection, KeyRow, Model, TableRow, Type};
use ermpath::compiler::bin::evaluate_bin;
use ermpath::compiler::{CompiledQuery, Compiler, QueryKind, ReadRequest};
use ermpath::error::{ErmError, ErmResult};
use ermpath::path::ast::{
    AggFunc, ElementInput, FilterExpr, Operator, PageBound, PathItem, ProjectionItem, Quantifier, SortKey,
};
use ermpath::path::Resolver;
use serde_json::json;

/// Category <- T, where T carries a private note and an owner-gated budget
fn test_model() -> Model {
    Introspection::new("1", 3)
        .acls(json!({"enumerate": ["*"], "select": ["*"]}))
        .schema("S")
        .table(TableRow::new("S", "Category"))
        .column(ColumnRow::new("S", "Category", "id", "int8").nullable(false))
        .column(ColumnRow::new("S", "Category", "label", "text"))
        .key(KeyRow::new("S", "Category_pkey", "S", "Category", ["id"]))
        .table(TableRow::new("S", "T"))
        .column(ColumnRow::new("S", "T", "id", "int8").nullable(false))
        .column(ColumnRow::new("S", "T", "name", "text"))
        .column(ColumnRow::new("S", "T", "cat_id", "int8"))
        .column(ColumnRow::new("S", "T", "score", "float8"))
        .column(ColumnRow::new("S", "T", "note", "text").acls(json!({"select": []})))
        .column(
            ColumnRow::new("S", "T", "budget", "int8")
                .acls(json!({"select": []}))
                .acl_bindings(json!({"mgr": {"types": ["select"], "projection": "name"}})),
        )
        .key(KeyRow::new("S", "T_pkey", "S", "T", ["id"]))
        .fkey(ForeignKeyRow::new("S", "T_cat_fkey", "S", "T", ["cat_id"], "S", "Category", ["id"]))
        .build()
        .unwrap()
}

fn compile(m: &Model, client: Client, items: &[PathItem], req: ReadRequest) -> ErmResult<CompiledQuery> {
    let access = AccessContext::new(m, client);
    let resolver = Resolver::new(&access);
    let path = resolver.resolve(items)?;
    Compiler::new(resolver).compile_read(&path, &req)
}

fn t_cat_10() -> Vec<PathItem> {
    vec![
        PathItem::Element(ElementInput::table("T")),
        PathItem::Filter(FilterExpr::compare("cat_id", Operator::Eq, "10")),
    ]
}

// ============================================================================
// Entity reads
// ============================================================================

#[test]
fn test_filtered_entity_is_join_free() {
    let m = test_model();
    let q = compile(&m, Client::new("u1"), &t_cat_10(), ReadRequest::entity()).unwrap();

    assert!(!q.sql.contains("JOIN"));
    assert!(!q.sql.contains("DISTINCT ON"));
    assert!(q.sql.contains(" AS t0 WHERE t0.\"cat_id\" = 10"));
    let names: Vec<&str> = q.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name", "cat_id", "score", "budget"]);
}

#[test]
fn test_denied_column_absent_dynamic_column_wrapped() {
    let m = test_model();
    let q = compile(&m, Client::new("u1"), &t_cat_10(), ReadRequest::entity()).unwrap();

    assert!(!q.sql.contains("\"note\""));
    // the gated column is computed inside the table source
    assert!(q.sql.contains(
        "CASE WHEN s.\"name\" = ANY (ARRAY['*','u1']::text[]) THEN s.\"budget\" ELSE NULL::int8 END AS \"budget\" FROM \"S\".\"T\" s) AS t0"
    ));
    assert!(q.sql.contains("t0.\"budget\" AS \"budget\""));
}

#[test]
fn test_join_adds_distinct_on_context_key() {
    let m = test_model();
    let q = compile(
        &m,
        Client::new("u1"),
        &[
            PathItem::Element(ElementInput::table("T")),
            PathItem::Filter(FilterExpr::set("score", Operator::Geq, Quantifier::Any, ["1.5", "2"])),
            PathItem::Element(ElementInput::table("Category")),
        ],
        ReadRequest::entity(),
    )
    .unwrap();
    assert!(q.sql.starts_with("SELECT DISTINCT ON (t1.\"id\") "));
    assert!(q.sql.contains("JOIN \"S\".\"Category\" AS t1 ON (t0.\"cat_id\" = t1.\"id\")"));
    assert_eq!(q.columns.len(), 2);
}

#[test]
fn test_anonymous_denied_is_unauthorized() {
    let m = Introspection::new("1", 1)
        .acls(json!({"enumerate": ["*"], "select": ["staff"]}))
        .schema("S")
        .table(TableRow::new("S", "T"))
        .column(ColumnRow::new("S", "T", "id", "int8").nullable(false))
        .key(KeyRow::new("S", "T_pkey", "S", "T", ["id"]))
        .build()
        .unwrap();
    let items = [PathItem::Element(ElementInput::table("T"))];
    assert!(matches!(
        compile(&m, Client::anonymous(), &items, ReadRequest::entity()),
        Err(ErmError::Unauthorized(_))
    ));
    assert!(matches!(
        compile(&m, Client::new("u1"), &items, ReadRequest::entity()),
        Err(ErmError::Forbidden(_))
    ));
    assert!(compile(&m, Client::new("u1").with_attribute("staff"), &items, ReadRequest::entity()).is_ok());
}

// ============================================================================
// Projections and aggregates
// ============================================================================

#[test]
fn test_attribute_through_outer_join() {
    let m = test_model();
    let q = compile(
        &m,
        Client::new("u1"),
        &[
            PathItem::Element(ElementInput::table("T").alias("t")),
            PathItem::Element(ElementInput::table("Category").outer(ermpath::path::ast::OuterJoin::Left)),
            PathItem::Context("t".to_string()),
        ],
        ReadRequest::new(QueryKind::Attribute(vec![ProjectionItem::column("id")])),
    )
    .unwrap();
    assert!(q.sql.contains("LEFT OUTER JOIN \"S\".\"Category\" AS t1"));
    assert_eq!(q.columns.len(), 1);
}

#[test]
fn test_count_aggregate() {
    let m = test_model();
    let q = compile(
        &m,
        Client::new("u1"),
        &t_cat_10(),
        ReadRequest::new(QueryKind::Aggregate(vec![ProjectionItem::aggregate(AggFunc::Cnt, "*", "n")])),
    )
    .unwrap();
    assert!(q.sql.starts_with("SELECT count(*) AS \"n\" FROM ("));
    assert_eq!(q.columns.len(), 1);
    assert_eq!(q.columns[0].ctype, Type::scalar("int8"));
}

#[test]
fn test_group_by_category() {
    let m = test_model();
    let q = compile(
        &m,
        Client::new("u1"),
        &[PathItem::Element(ElementInput::table("T"))],
        ReadRequest::new(QueryKind::AttributeGroup {
            keys: vec![ProjectionItem::column("cat_id")],
            extras: vec![ProjectionItem::aggregate(AggFunc::Max, "score", "top")],
        })
        .sort(vec![SortKey::asc("cat_id")]),
    )
    .unwrap();
    assert!(q.sql.contains("GROUP BY"));
    assert!(q.sql.ends_with("ORDER BY s.\"cat_id\" ASC NULLS LAST"));
    assert_eq!(q.columns.len(), 2);
}

// ============================================================================
// Binning
// ============================================================================

#[test]
fn test_bin_edges() {
    let below = evaluate_bin(Some(-5.0), 4, 0.0, 100.0).unwrap();
    assert_eq!((below.bucket, below.lower, below.upper), (Some(0), None, Some(0.0)));

    let above = evaluate_bin(Some(105.0), 4, 0.0, 100.0).unwrap();
    assert_eq!((above.bucket, above.lower, above.upper), (Some(5), Some(100.0), None));

    let null = evaluate_bin(None, 4, 0.0, 100.0).unwrap();
    assert_eq!((null.bucket, null.lower, null.upper), (None, None, None));
}

#[test]
fn test_bin_projection_requires_ordered_bounds() {
    let m = test_model();
    let items = [PathItem::Element(ElementInput::table("T"))];
    let q = compile(
        &m,
        Client::new("u1"),
        &items,
        ReadRequest::new(QueryKind::AttributeGroup {
            keys: vec![ProjectionItem::bin("score", 4, "0", "100", "b")],
            extras: vec![ProjectionItem::aggregate(AggFunc::Cnt, "*", "n")],
        }),
    )
    .unwrap();
    assert!(q.sql.contains("width_bucket((t0.\"score\")::float8, 0.0::float8, 100.0::float8, 4)"));

    let r = compile(
        &m,
        Client::new("u1"),
        &items,
        ReadRequest::new(QueryKind::Attribute(vec![ProjectionItem::bin("score", 4, "100", "0", "b")])),
    );
    assert!(matches!(r, Err(ErmError::BadData(_))));
}

// ============================================================================
// Sorting and paging
// ============================================================================

#[test]
fn test_page_after() {
    let m = test_model();
    let q = compile(
        &m,
        Client::new("u1"),
        &[PathItem::Element(ElementInput::table("T"))],
        ReadRequest::new(QueryKind::Attribute(vec![ProjectionItem::column("id"), ProjectionItem::column("name")]))
            .sort(vec![SortKey::asc("name"), SortKey::asc("id")])
            .page(PageBound::after([None, Some("7".to_string())]))
            .limit(25),
    )
    .unwrap();
    assert!(q.sql.starts_with("SELECT * FROM (SELECT t0.\"id\" AS \"id\", t0.\"name\" AS \"name\" FROM "));
    assert!(q.sql.contains(") s WHERE (False) OR ("));
    assert!(q.sql.contains("s.\"name\" IS NOT DISTINCT FROM NULL::text AND (s.\"id\" > 7 OR s.\"id\" IS NULL)"));
    assert!(q.sql.ends_with("ORDER BY s.\"name\" ASC NULLS LAST, s.\"id\" ASC NULLS LAST LIMIT 25"));
}

#[test]
fn test_page_errors() {
    let m = test_model();
    let items = [PathItem::Element(ElementInput::table("T"))];
    let r = compile(
        &m,
        Client::new("u1"),
        &items,
        ReadRequest::entity()
            .sort(vec![SortKey::asc("id")])
            .page(PageBound::before([Some("3".to_string())])),
    );
    assert!(matches!(r, Err(ErmError::BadSyntax(_))));

    let r = compile(&m, Client::new("u1"), &items, ReadRequest::entity().sort(vec![SortKey::asc("note")]));
    assert!(matches!(r, Err(ErmError::BadData(_))));
}
