//! Path resolution integration tests

use ermpath::catalog::{AccessContext, Client, ColumnRow, ForeignKeyRow, Introspection, KeyRow, Model, TableRow};
use ermpath::compiler::explain;
use ermpath::config::LinkPolicy;
use ermpath::error::ErmError;
use ermpath::path::ast::{ElementInput, FilterExpr, Name, Operator, OuterJoin, PathItem};
use ermpath::path::{ColumnTarget, Direction, Link, Resolver};
use serde_json::json;

/// Category <- T, plus Pair with two references to Category
fn test_model() -> Model {
    Introspection::new("1", 7)
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
        .key(KeyRow::new("S", "T_pkey", "S", "T", ["id"]))
        .fkey(ForeignKeyRow::new("S", "T_cat_fkey", "S", "T", ["cat_id"], "S", "Category", ["id"]))
        .table(TableRow::new("S", "Pair"))
        .column(ColumnRow::new("S", "Pair", "id", "int8").nullable(false))
        .column(ColumnRow::new("S", "Pair", "left_cat", "int8"))
        .column(ColumnRow::new("S", "Pair", "right_cat", "int8"))
        .key(KeyRow::new("S", "Pair_pkey", "S", "Pair", ["id"]))
        .fkey(ForeignKeyRow::new("S", "Pair_left_fkey", "S", "Pair", ["left_cat"], "S", "Category", ["id"]))
        .fkey(ForeignKeyRow::new("S", "Pair_right_fkey", "S", "Pair", ["right_cat"], "S", "Category", ["id"]))
        .build()
        .unwrap()
}

fn t_cat_10() -> Vec<PathItem> {
    vec![
        PathItem::Element(ElementInput::table("T")),
        PathItem::Filter(FilterExpr::compare("cat_id", Operator::Eq, "10")),
    ]
}

// ============================================================================
// Element and link resolution
// ============================================================================

#[test]
fn test_single_table_with_filter() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("u1"));
    let path = Resolver::new(&access).resolve(&t_cat_10()).unwrap();

    assert_eq!(path.len(), 1);
    assert_eq!(path.current(), 0);
    assert_eq!(path.element(0).table, m.table_by_name("S", "T").unwrap().id);
    assert_eq!(path.element(0).filters.len(), 1);
    assert!(path.element(0).link.is_none());
}

#[test]
fn test_resolution_is_deterministic() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("u1"));
    let items = vec![
        PathItem::Element(ElementInput::table("S:T").alias("t")),
        PathItem::Element(ElementInput::table("Category")),
        PathItem::Filter(FilterExpr::compare("label", Operator::Regexp, "^a")),
    ];
    let first = Resolver::new(&access).resolve(&items).unwrap();
    let second = Resolver::new(&access).resolve(&items).unwrap();
    assert_eq!(first, second);
    assert_eq!(explain(&m, &first), explain(&m, &second));
}

#[test]
fn test_implicit_outbound_link() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("u1"));
    let path = Resolver::new(&access)
        .resolve(&[
            PathItem::Element(ElementInput::table("T")),
            PathItem::Element(ElementInput::table("Category").outer(OuterJoin::Left)),
        ])
        .unwrap();

    assert_eq!(path.current(), 1);
    assert_eq!(path.element(1).context_pos, Some(0));
    assert_eq!(path.element(1).outer, Some(OuterJoin::Left));
    match &path.element(1).link {
        Some(Link::Edges(edges)) => {
            assert_eq!(edges.len(), 1);
            assert_eq!(edges[0].direction, Direction::Outbound);
        }
        other => panic!("Expected edge, got {:?}", other),
    }
}

#[test]
fn test_ambiguous_link_rejected_by_default() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("u1"));
    let items = vec![
        PathItem::Element(ElementInput::table("Category")),
        PathItem::Element(ElementInput::table("Pair")),
    ];
    let r = Resolver::new(&access).resolve(&items);
    assert!(matches!(r, Err(ErmError::ConflictModel(_))));

    let path = Resolver::new(&access)
        .with_policy(LinkPolicy::Disjunction)
        .resolve(&items)
        .unwrap();
    assert!(matches!(&path.element(1).link, Some(Link::Edges(edges)) if edges.len() == 2));
}

#[test]
fn test_column_link_disambiguates() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("u1"));
    let path = Resolver::new(&access)
        .resolve(&[
            PathItem::Element(ElementInput::table("Pair")),
            PathItem::Element(ElementInput::columns(["right_cat"])),
        ])
        .unwrap();
    assert_eq!(path.element(1).table, m.table_by_name("S", "Category").unwrap().id);
    match &path.element(1).link {
        Some(Link::Edges(edges)) => {
            assert_eq!(edges.len(), 1);
            let kr = m.keyref(edges[0].keyref);
            assert_eq!(kr.constraint_name().map(|n| n.to_string()), Some("S:Pair_right_fkey".to_string()));
        }
        other => panic!("Expected edge, got {:?}", other),
    }
}

#[test]
fn test_unknown_table() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("u1"));
    let r = Resolver::new(&access).resolve(&[PathItem::Element(ElementInput::table("Nope"))]);
    assert!(matches!(r, Err(ErmError::ConflictModel(msg)) if msg.contains("not found")));
}

// ============================================================================
// Aliases and context
// ============================================================================

#[test]
fn test_context_reset_to_alias() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("u1"));
    let resolver = Resolver::new(&access);
    let path = resolver
        .resolve(&[
            PathItem::Element(ElementInput::table("T").alias("t")),
            PathItem::Element(ElementInput::table("Category").alias("c")),
            PathItem::Context("t".to_string()),
            PathItem::Filter(FilterExpr::compare("c:label", Operator::Eq, "x")),
        ])
        .unwrap();
    assert_eq!(path.current(), 0);
    assert_eq!(path.alias("c"), Some(1));
    // filter lands on the context element even though it names another alias
    assert_eq!(path.element(0).filters.len(), 1);
    assert!(path.element(1).filters.is_empty());

    assert!(matches!(
        resolver.resolve_column(&path, &Name::from("c:label")),
        Ok(ColumnTarget::Column(c)) if c.element == 1
    ));
}

#[test]
fn test_unknown_alias() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("u1"));
    let r = Resolver::new(&access).resolve(&[
        PathItem::Element(ElementInput::table("T")),
        PathItem::Context("missing".to_string()),
    ]);
    assert!(matches!(r, Err(ErmError::ConflictModel(_))));
}

// ============================================================================
// Visibility
// ============================================================================

#[test]
fn test_hidden_table_not_found() {
    let m = Introspection::new("1", 1)
        .schema("S")
        .table(TableRow::new("S", "Hidden"))
        .column(ColumnRow::new("S", "Hidden", "id", "int8").nullable(false))
        .key(KeyRow::new("S", "Hidden_pkey", "S", "Hidden", ["id"]))
        .build()
        .unwrap();
    let access = AccessContext::new(&m, Client::new("u1"));
    let r = Resolver::new(&access).resolve(&[PathItem::Element(ElementInput::table("Hidden"))]);
    assert!(matches!(r, Err(ErmError::ConflictModel(_))));
}

// ============================================================================
// Explain
// ============================================================================

#[test]
fn test_explain_tree() {
    let m = test_model();
    let access = AccessContext::new(&m, Client::new("u1"));
    let path = Resolver::new(&access).resolve(&t_cat_10()).unwrap();
    assert_eq!(
        explain(&m, &path),
        "t0 \"S\".\"T\"  <- context\n  filter t0.\"cat_id\" = 10\n"
    );
}
