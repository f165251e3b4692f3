//! Entity and attribute delete planning
//!
//! The rows named by a path are first copied, by key, into a victims
//! relation. Guards and the final mutation correlate on that relation so
//! the path query runs once.

use crate::catalog::{AccessContext, ColumnId, Model, ResourceId, Right, TableId};
use crate::compiler::authz::{dynacl_clauses, dynauthz_restricted, negative};
use crate::compiler::Compiler;
use crate::error::{ErmError, ErmResult};
use crate::path::ast::Name;
use crate::path::{ColumnTarget, EntityPath};
use crate::sql::quote_ident;
use crate::write::{drop_table, keymatch, target_table, Statement, WritePlan, VICTIMS_TABLE};

/// Columns identifying victim rows: the shortest primary key, else every key column
fn victim_keys(model: &Model, table: TableId) -> Vec<ColumnId> {
    if let Some(pk) = model.primary_keys(table).first() {
        return model.unique(*pk).columns.iter().copied().collect();
    }
    let mut cols: Vec<ColumnId> = model
        .table(table)
        .uniques
        .keys()
        .flat_map(|set| set.iter().copied())
        .collect();
    cols.sort();
    cols.dedup();
    cols
}

/// Shared prologue: rights, victims relation and the empty check
struct Victims<'a, 'm> {
    access: &'a AccessContext<'m>,
    table: TableId,
    keys: Vec<ColumnId>,
}

impl<'a, 'm> Victims<'a, 'm> {
    fn stage(compiler: &Compiler<'a, 'm>, path: &EntityPath) -> ErmResult<(Self, Vec<Statement>)> {
        let access = compiler.access();
        let model = access.model();
        let elem = path
            .current_element()
            .ok_or_else(|| ErmError::BadSyntax("path must name at least one table".to_string()))?;
        for e in path.elements() {
            access.enforce_right(ResourceId::Table(e.table), Right::Select, false)?;
        }
        let table = target_table(model, elem.table)?;
        let keys = victim_keys(model, table);
        if keys.is_empty() {
            return Err(ErmError::ConflictModel(format!(
                "Entity {} has no key to identify rows",
                model.table_display(table)
            )));
        }
        let alias = elem.sql_alias();
        let select = keys
            .iter()
            .map(|c| {
                let n = model.column(*c).sql_name();
                format!("{}.{} AS {}", alias, n, n)
            })
            .collect::<Vec<_>>();
        let stmts = vec![
            Statement::Exec(format!(
                "CREATE TEMPORARY TABLE {} AS SELECT DISTINCT {} FROM {}{}",
                quote_ident(VICTIMS_TABLE),
                select.join(", "),
                compiler.from_sql(path)?,
                compiler.where_sql(path)?
            )),
            Statement::ExpectRows {
                sql: format!("SELECT count(*) FROM {}", quote_ident(VICTIMS_TABLE)),
                on_empty: ErmError::NotFound("entities matching request path".to_string()),
            },
        ];
        Ok((Victims { access, table, keys }, stmts))
    }

    fn model(&self) -> &'m Model {
        self.access.model()
    }

    fn matched(&self) -> String {
        keymatch(self.model(), &self.keys, "t", "v")
    }

    /// Guard failing when any victim fails every clause
    fn guard(&self, clauses: &[String], what: String) -> Statement {
        Statement::Guard {
            sql: format!(
                "SELECT 1 FROM {} t JOIN {} v ON ({}) WHERE {} LIMIT 1",
                self.model().table_sql_name(self.table),
                quote_ident(VICTIMS_TABLE),
                self.matched(),
                negative(clauses)
            ),
            on_rows: ErmError::denied(what, self.access.is_anonymous()),
        }
    }
}

/// Plan deletion of the rows matched by the context element of `path`
pub fn plan_entity_delete(compiler: &Compiler<'_, '_>, path: &EntityPath) -> ErmResult<WritePlan> {
    let (victims, prologue) = Victims::stage(compiler, path)?;
    let access = victims.access;
    let model = access.model();
    let table = victims.table;
    let res = ResourceId::Table(table);
    access.enforce_right(res, Right::Delete, false)?;

    let mut plan = WritePlan::new(table);
    for stmt in prologue {
        plan.push(stmt);
    }
    if access.has_right(res, Right::Delete).is_none() {
        let clauses = dynacl_clauses(access, res, Right::Delete, "t")?;
        plan.push(victims.guard(
            &clauses,
            format!("delete access on one or more rows in table {}", model.table_display(table)),
        ));
    }
    plan.push(Statement::Returning(format!(
        "DELETE FROM {} AS t USING {} AS v WHERE {} RETURNING t.*",
        model.table_sql_name(table),
        quote_ident(VICTIMS_TABLE),
        victims.matched()
    )));
    plan.push(drop_table(VICTIMS_TABLE));
    tracing::debug!(table = %model.table_display(table), "planned entity delete");
    Ok(plan)
}

/// Plan clearing `columns` to NULL on the rows matched by `path`
pub fn plan_attribute_delete(
    compiler: &Compiler<'_, '_>,
    path: &EntityPath,
    columns: &[Name],
) -> ErmResult<WritePlan> {
    if columns.is_empty() {
        return Err(ErmError::BadSyntax("attribute delete requires column names".to_string()));
    }
    let access = compiler.access();
    let model = access.model();
    let mut targets: Vec<ColumnId> = Vec::new();
    for name in columns {
        let c = match compiler.resolver().resolve_column(path, name)? {
            ColumnTarget::Column(c) if c.element == path.current() => c.column,
            ColumnTarget::Column(_) => {
                return Err(ErmError::ConflictModel(format!(
                    "column {} does not belong to the context table",
                    name
                )))
            }
            ColumnTarget::FreeText(_) => {
                return Err(ErmError::BadSyntax(format!("cannot delete column {}", name)))
            }
        };
        let col = model.column(c);
        let table = model.table(col.table);
        if table.uniques.keys().any(|set| set.contains(&c)) {
            return Err(ErmError::ConflictModel(format!(
                "column {} is part of a key and cannot be cleared",
                col.name
            )));
        }
        if !col.nullok {
            return Err(ErmError::ConflictData(format!(
                "column {} is not nullable",
                col.name
            )));
        }
        if !targets.contains(&c) {
            targets.push(c);
        }
    }

    let (victims, prologue) = Victims::stage(compiler, path)?;
    let table = victims.table;
    let display = model.table_display(table);
    access.enforce_right(ResourceId::Table(table), Right::Update, false)?;
    for c in &targets {
        access.enforce_right(ResourceId::Column(*c), Right::Update, false)?;
    }

    let mut plan = WritePlan::new(table);
    for stmt in prologue {
        plan.push(stmt);
    }
    if access.has_right(ResourceId::Table(table), Right::Update).is_none() {
        let clauses = dynacl_clauses(access, ResourceId::Table(table), Right::Update, "t")?;
        plan.push(victims.guard(
            &clauses,
            format!("update access on one or more rows in table {}", display),
        ));
    }
    for c in &targets {
        if access.has_right(ResourceId::Column(*c), Right::Update).is_none()
            && dynauthz_restricted(access, *c, Right::Update)
        {
            let clauses = dynacl_clauses(access, ResourceId::Column(*c), Right::Update, "t")?;
            plan.push(victims.guard(
                &clauses,
                format!(
                    "update access on column {}:{} for one or more rows",
                    display,
                    model.column(*c).name
                ),
            ));
        }
    }
    let mut assigns: Vec<String> = targets
        .iter()
        .map(|c| format!("{} = NULL", model.column(*c).sql_name()))
        .collect();
    for name in ["RMT", "RMB"] {
        if let Some(c) = model.table(table).column_id(name) {
            assigns.push(format!("{} = DEFAULT", model.column(c).sql_name()));
        }
    }
    plan.push(Statement::Returning(format!(
        "UPDATE {} AS t SET {} FROM {} AS v WHERE {} RETURNING t.*",
        model.table_sql_name(table),
        assigns.join(", "),
        quote_ident(VICTIMS_TABLE),
        victims.matched()
    )));
    plan.push(drop_table(VICTIMS_TABLE));
    let table_display = &display;
    tracing::debug!(table = %table_display, columns = targets.len(), "planned attribute delete");
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::introspect::{ColumnRow, ForeignKeyRow, Introspection, KeyRow, TableRow};
    use crate::catalog::{Client, Model};
    use crate::path::ast::{ElementInput, FilterExpr, Operator, PathItem};
    use crate::path::Resolver;
    use serde_json::{json, Value};

    fn model(table_acls: Value, bindings: Value) -> Model {
        Introspection::new("1", 1)
            .acls(json!({"enumerate": ["*"], "select": ["*"]}))
            .schema("S")
            .table(TableRow::new("S", "Cat"))
            .column(ColumnRow::new("S", "Cat", "id", "int8").nullable(false))
            .key(KeyRow::new("S", "Cat_pkey", "S", "Cat", ["id"]))
            .table(TableRow::new("S", "T").acls(table_acls).acl_bindings(bindings))
            .column(ColumnRow::new("S", "T", "id", "int8").nullable(false))
            .column(ColumnRow::new("S", "T", "cat_id", "int8"))
            .column(ColumnRow::new("S", "T", "owner", "text"))
            .column(ColumnRow::new("S", "T", "label", "text").nullable(false))
            .key(KeyRow::new("S", "T_pkey", "S", "T", ["id"]))
            .fkey(ForeignKeyRow::new("S", "T_cat_fkey", "S", "T", ["cat_id"], "S", "Cat", ["id"]))
            .build()
            .unwrap()
    }

    fn path(access: &AccessContext<'_>) -> EntityPath {
        Resolver::new(access)
            .resolve(&[
                PathItem::Element(ElementInput::table("S:T")),
                PathItem::Filter(FilterExpr::compare("cat_id", Operator::Eq, "10")),
            ])
            .unwrap()
    }

    #[test]
    fn test_entity_delete_plan() {
        let m = model(json!({"delete": ["*"], "update": ["*"]}), json!({}));
        let access = AccessContext::new(&m, Client::new("u1"));
        let compiler = Compiler::new(Resolver::new(&access));
        let plan = plan_entity_delete(&compiler, &path(&access)).unwrap();
        let kinds: Vec<&str> = plan.statements.iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, vec!["exec", "expect", "returning", "exec"]);
        assert!(plan.statements[0].sql().starts_with(
            "CREATE TEMPORARY TABLE \"_ermpath_victims\" AS SELECT DISTINCT t0.\"id\" AS \"id\" FROM \"S\".\"T\" AS t0 WHERE "
        ));
        assert!(matches!(
            &plan.statements[1],
            Statement::ExpectRows { on_empty: ErmError::NotFound(_), .. }
        ));
        assert_eq!(
            plan.statements[2].sql(),
            "DELETE FROM \"S\".\"T\" AS t USING \"_ermpath_victims\" AS v WHERE (t.\"id\" = v.\"id\") RETURNING t.*"
        );
    }

    #[test]
    fn test_entity_delete_rights() {
        let m = model(json!({}), json!({}));
        let access = AccessContext::new(&m, Client::new("u1"));
        let compiler = Compiler::new(Resolver::new(&access));
        assert!(matches!(
            plan_entity_delete(&compiler, &path(&access)),
            Err(ErmError::Forbidden(_))
        ));

        let m = model(json!({}), json!({"own": {"types": ["delete"], "projection": "owner"}}));
        let access = AccessContext::new(&m, Client::new("u1"));
        let compiler = Compiler::new(Resolver::new(&access));
        let plan = plan_entity_delete(&compiler, &path(&access)).unwrap();
        assert_eq!(
            plan.statements[2].sql(),
            "SELECT 1 FROM \"S\".\"T\" t JOIN \"_ermpath_victims\" v ON ((t.\"id\" = v.\"id\")) WHERE COALESCE(NOT (t.\"owner\" = ANY (ARRAY['*','u1']::text[])), True) LIMIT 1"
        );
        assert!(plan.statements.iter().position(|s| s.kind() == "guard") < plan.first_mutation());
    }

    #[test]
    fn test_attribute_delete() {
        let m = model(json!({"delete": ["*"], "update": ["*"]}), json!({}));
        let access = AccessContext::new(&m, Client::new("u1"));
        let compiler = Compiler::new(Resolver::new(&access));
        let p = path(&access);
        let plan = plan_attribute_delete(&compiler, &p, &[Name::from("owner")]).unwrap();
        assert_eq!(
            plan.statements[2].sql(),
            "UPDATE \"S\".\"T\" AS t SET \"owner\" = NULL FROM \"_ermpath_victims\" AS v WHERE (t.\"id\" = v.\"id\") RETURNING t.*"
        );
        assert!(matches!(
            plan_attribute_delete(&compiler, &p, &[Name::from("id")]),
            Err(ErmError::ConflictModel(_))
        ));
        assert!(matches!(
            plan_attribute_delete(&compiler, &p, &[Name::from("label")]),
            Err(ErmError::ConflictData(_))
        ));
        assert!(matches!(
            plan_attribute_delete(&compiler, &p, &[]),
            Err(ErmError::BadSyntax(_))
        ));
    }

    #[test]
    fn test_delete_requires_base_table() {
        let m = Introspection::new("1", 1)
            .acls(json!({"enumerate": ["*"], "select": ["*"], "delete": ["*"]}))
            .schema("S")
            .table(TableRow::new("S", "V").kind("v"))
            .column(ColumnRow::new("S", "V", "id", "int8").nullable(false))
            .build()
            .unwrap();
        let access = AccessContext::new(&m, Client::new("u1"));
        let compiler = Compiler::new(Resolver::new(&access));
        let p = Resolver::new(&access)
            .resolve(&[PathItem::Element(ElementInput::table("S:V"))])
            .unwrap();
        assert!(matches!(
            plan_entity_delete(&compiler, &p),
            Err(ErmError::ConflictModel(_))
        ));
    }
}
