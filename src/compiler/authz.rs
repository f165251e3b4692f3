//! Authorization SQL
//!
//! Rights that resolve to `None` are enforced in the generated statement:
//! each in-scope dynamic ACL binding becomes a boolean clause over the row
//! being tested, and the clauses of a resource are OR'd together. A table
//! gate wraps the table in a filtered sub-select; a column gate replaces
//! the column value with NULL where the clause fails.

use crate::catalog::{
    AccessContext, AclBinding, ColumnId, ProjectionStep, ProjectionType, ResourceId, Right,
    TableId,
};
use crate::compiler::predicate::compare_sql;
use crate::error::{ErmError, ErmResult};
use crate::path::ast::FilterExpr;
use crate::sql::{and_all, or_any, quote_ident, text_array};

/// Boolean clauses granting `right` on rows of `res` read through `alias`
///
/// A static grant yields `["True"]`. A static denial, or an undetermined
/// right with no binding in scope, yields `["False"]`.
pub fn dynacl_clauses(
    access: &AccessContext<'_>,
    res: ResourceId,
    right: Right,
    alias: &str,
) -> ErmResult<Vec<String>> {
    match access.has_right(res, right) {
        Some(true) => Ok(vec!["True".to_string()]),
        Some(false) => Ok(vec!["False".to_string()]),
        None => {
            let bindings = access.inscope_bindings(res, right);
            if bindings.is_empty() {
                return Ok(vec!["False".to_string()]);
            }
            let base = binding_base(access, res)?;
            bindings
                .iter()
                .map(|b| binding_clause(access, b, base, alias))
                .collect()
        }
    }
}

/// Single expression true where any clause grants
pub fn positive(clauses: &[String]) -> String {
    or_any(clauses)
}

/// Single expression true where no clause grants, treating NULL as no grant
pub fn negative(clauses: &[String]) -> String {
    let parts: Vec<String> = clauses
        .iter()
        .map(|c| format!("COALESCE(NOT ({}), True)", c))
        .collect();
    and_all(&parts)
}

/// Table whose rows a resource's bindings are evaluated against
fn binding_base(access: &AccessContext<'_>, res: ResourceId) -> ErmResult<TableId> {
    let model = access.model();
    match res {
        ResourceId::Table(t) => Ok(t),
        ResourceId::Column(c) => Ok(model.column(c).table),
        ResourceId::KeyRef(k) => Ok(model.keyref_to_table(k)),
        other => Err(ErmError::ConflictModel(format!(
            "{} does not support ACL bindings",
            model.resource_display(other)
        ))),
    }
}

/// Compile one binding against the base row aliased as `alias`
pub fn binding_clause(
    access: &AccessContext<'_>,
    binding: &AclBinding,
    base: TableId,
    alias: &str,
) -> ErmResult<String> {
    let model = access.model();
    let mut scope = BindingScope {
        access,
        current: (alias.to_string(), base),
        aliases: Vec::new(),
    };

    if binding.projection.is_local() {
        let mut clauses = Vec::new();
        for step in &binding.projection.steps {
            if let ProjectionStep::Filter(f) = step {
                clauses.push(scope.filter_sql(f)?);
            }
        }
        clauses.push(scope.acl_test(binding, &binding.projection.column)?);
        return Ok(and_all(&clauses));
    }

    let mut from: Vec<String> = Vec::new();
    let mut wheres: Vec<String> = Vec::new();
    let mut n = 0;
    for step in &binding.projection.steps {
        match step {
            ProjectionStep::Join {
                keyref,
                inbound,
                alias: step_alias,
                context,
            } => {
                let left = match context {
                    Some(ctx) => scope.lookup(ctx)?,
                    None => scope.current.clone(),
                };
                n += 1;
                let inner = format!("{}b{}", alias, n);
                let kr = model.keyref(*keyref);
                let (target, cond): (TableId, Vec<String>) = if *inbound {
                    (
                        model.keyref_from_table(*keyref),
                        kr.pairs
                            .iter()
                            .map(|(f, p)| {
                                format!(
                                    "{}.{} = {}.{}",
                                    left.0,
                                    model.column(*p).sql_name(),
                                    inner,
                                    model.column(*f).sql_name()
                                )
                            })
                            .collect(),
                    )
                } else {
                    (
                        model.keyref_to_table(*keyref),
                        kr.pairs
                            .iter()
                            .map(|(f, p)| {
                                format!(
                                    "{}.{} = {}.{}",
                                    left.0,
                                    model.column(*f).sql_name(),
                                    inner,
                                    model.column(*p).sql_name()
                                )
                            })
                            .collect(),
                    )
                };
                let source = format!("{} {}", model.table_sql_name(target), inner);
                if from.is_empty() {
                    from.push(source);
                    wheres.push(and_all(&cond));
                } else {
                    from.push(format!("JOIN {} ON ({})", source, and_all(&cond)));
                }
                scope.current = (inner, target);
                if let Some(a) = step_alias {
                    scope.aliases.push((a.clone(), scope.current.clone()));
                }
            }
            ProjectionStep::Filter(f) => wheres.push(scope.filter_sql(f)?),
        }
    }
    wheres.push(scope.acl_test(binding, &binding.projection.column)?);
    Ok(format!(
        "EXISTS (SELECT 1 FROM {} WHERE {})",
        from.join(" "),
        and_all(&wheres)
    ))
}

/// Name scope while compiling a binding projection
struct BindingScope<'a, 'm> {
    access: &'a AccessContext<'m>,
    current: (String, TableId),
    aliases: Vec<(String, (String, TableId))>,
}

impl BindingScope<'_, '_> {
    fn lookup(&self, name: &str) -> ErmResult<(String, TableId)> {
        self.aliases
            .iter()
            .find(|(a, _)| a == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| ErmError::ConflictModel(format!("alias {} not bound in ACL binding", name)))
    }

    fn column_expr(&self, sql_alias: &str, table: TableId, name: &str) -> ErmResult<(String, ColumnId)> {
        let col = self.access.model().column_by_name(table, name)?;
        Ok((format!("{}.{}", sql_alias, col.sql_name()), col.id))
    }

    fn filter_sql(&self, f: &FilterExpr) -> ErmResult<String> {
        match f {
            FilterExpr::Compare { name, op, operand } => {
                let (sql_alias, table) = match name.parts() {
                    [_] => self.current.clone(),
                    [a, _] => self.lookup(a)?,
                    _ => {
                        return Err(ErmError::BadData(format!(
                            "invalid column name {} in ACL binding",
                            name
                        )))
                    }
                };
                let cname = name.parts().last().map(String::as_str).unwrap_or_default();
                let (expr, col) = self.column_expr(&sql_alias, table, cname)?;
                compare_sql(&expr, &self.access.model().column(col).ctype, *op, operand)
            }
            FilterExpr::Not(inner) => Ok(format!("NOT ({})", self.filter_sql(inner)?)),
            FilterExpr::And(items) => Ok(and_all(
                &items.iter().map(|i| self.filter_sql(i)).collect::<ErmResult<Vec<_>>>()?,
            )),
            FilterExpr::Or(items) => Ok(or_any(
                &items.iter().map(|i| self.filter_sql(i)).collect::<ErmResult<Vec<_>>>()?,
            )),
        }
    }

    fn acl_test(&self, binding: &AclBinding, column: &str) -> ErmResult<String> {
        let (sql_alias, table) = self.current.clone();
        let (expr, col) = self.column_expr(&sql_alias, table, column)?;
        match binding.projection_type {
            ProjectionType::NonNull => Ok(format!("{} IS NOT NULL", expr)),
            ProjectionType::Acl => {
                let attrs = text_array(&self.access.client().attribute_list())?;
                if self.access.model().column(col).ctype.is_array() {
                    Ok(format!("{} && {}", expr, attrs))
                } else {
                    Ok(format!("{} = ANY ({})", expr, attrs))
                }
            }
        }
    }
}

/// Whether a column needs a per-row value gate beyond its table's row gate
pub fn dynauthz_restricted(access: &AccessContext<'_>, col: ColumnId, right: Right) -> bool {
    if access.has_right(ResourceId::Column(col), right).is_some() {
        return false;
    }
    let model = access.model();
    let table = model.column(col).table;
    if access.has_right(ResourceId::Table(table), right) == Some(true) {
        return true;
    }
    let table_bindings = &model.table(table).dynacls;
    model
        .column(col)
        .dynacls
        .keys()
        .any(|name| table_bindings.contains_key(name))
}

/// Whether a column is visible and readable at all
pub fn column_selectable(access: &AccessContext<'_>, col: ColumnId) -> bool {
    let res = ResourceId::Column(col);
    access.enumerable(res) && access.has_right(res, Right::Select) != Some(false)
}

/// Select-list expression for a column read through `alias`
pub fn column_select_sql(access: &AccessContext<'_>, col: ColumnId, alias: &str) -> ErmResult<String> {
    let column = access.model().column(col);
    let plain = format!("{}.{}", alias, column.sql_name());
    if !dynauthz_restricted(access, col, Right::Select) {
        return Ok(format!("{} AS {}", plain, column.sql_name()));
    }
    let clauses = dynacl_clauses(access, ResourceId::Column(col), Right::Select, alias)?;
    Ok(format!(
        "CASE WHEN {} THEN {} ELSE NULL::{} END AS {}",
        positive(&clauses),
        plain,
        column.ctype.sql_storage(),
        column.sql_name()
    ))
}

/// FROM-list item for a table read through `alias`, gated for select
pub fn table_source_sql(access: &AccessContext<'_>, table: TableId, alias: &str) -> ErmResult<String> {
    let model = access.model();
    let clauses = dynacl_clauses(access, ResourceId::Table(table), Right::Select, "s")?;
    let cols: Vec<ColumnId> = model
        .columns_of(table)
        .filter(|c| column_selectable(access, c.id))
        .map(|c| c.id)
        .collect();
    let restricted = cols
        .iter()
        .any(|c| dynauthz_restricted(access, *c, Right::Select));
    let open = clauses.len() == 1 && clauses[0] == "True";
    if open && !restricted {
        return Ok(format!("{} AS {}", model.table_sql_name(table), alias));
    }
    let select = cols
        .iter()
        .map(|c| column_select_sql(access, *c, "s"))
        .collect::<ErmResult<Vec<_>>>()?;
    let select = if select.is_empty() {
        "NULL".to_string()
    } else {
        select.join(", ")
    };
    let filter = if open {
        String::new()
    } else {
        format!(" WHERE {}", positive(&clauses))
    };
    Ok(format!(
        "(SELECT {} FROM {} s{}) AS {}",
        select,
        model.table_sql_name(table),
        filter,
        alias
    ))
}

/// Quoted column reference `alias."name"`
pub fn column_ref(access: &AccessContext<'_>, col: ColumnId, alias: &str) -> String {
    format!("{}.{}", alias, quote_ident(&access.model().column(col).name))
}
