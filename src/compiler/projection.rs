//! Attribute, grouped and aggregate projections

use crate::catalog::{ResourceId, Right, Type};
use crate::compiler::authz::column_selectable;
use crate::compiler::bin::bin_sql;
use crate::compiler::{check_unique_names, nonempty_list, Compiler, OutputColumn};
use crate::error::{ErmError, ErmResult};
use crate::path::ast::{AggFunc, Name, ProjExpr, ProjectionItem};
use crate::path::{ColumnTarget, EntityPath};
use crate::sql::quote_ident;

/// A non-aggregate output expression
struct Planned {
    expr: String,
    name: String,
    ctype: Type,
}

/// Aggregate input: a value expression, or every row for `cnt(*)`
enum AggInput {
    Rows,
    Value(String),
}

struct PlannedAgg {
    func: AggFunc,
    input: AggInput,
    name: String,
    ctype: Type,
}

impl PlannedAgg {
    /// Aggregate call over `arg`, the staged input column
    fn call(&self, arg: &str) -> String {
        match (&self.input, self.func) {
            (AggInput::Rows, _) => "count(*)".to_string(),
            (_, AggFunc::Cnt) => format!("count({})", arg),
            (_, AggFunc::CntD) => format!("count(DISTINCT {})", arg),
            (_, AggFunc::Array) => format!("array_to_json(array_agg({}))::jsonb", arg),
            (_, AggFunc::ArrayD) => format!("array_to_json(array_agg(DISTINCT {}))::jsonb", arg),
            (_, AggFunc::Min) => format!("min({})", arg),
            (_, AggFunc::Max) => format!("max({})", arg),
            (_, AggFunc::Avg) => format!("avg({})", arg),
            (_, AggFunc::Sum) => format!("sum({})", arg),
        }
    }
}

enum Extra {
    Plain(Planned),
    Agg(PlannedAgg),
}

impl Compiler<'_, '_> {
    /// Projected columns, one row per distinct context entity
    pub(crate) fn attribute_query(
        &self,
        path: &EntityPath,
        items: &[ProjectionItem],
    ) -> ErmResult<(String, Vec<OutputColumn>)> {
        if items.is_empty() {
            return Err(ErmError::BadSyntax("projection requires at least one column".to_string()));
        }
        let mut planned = Vec::new();
        for item in items {
            planned.extend(self.plan_plain(path, item)?);
        }
        let columns: Vec<OutputColumn> = planned
            .iter()
            .map(|p| OutputColumn::new(p.name.clone(), p.ctype.clone()))
            .collect();
        check_unique_names(&columns)?;
        let select: Vec<String> = planned
            .iter()
            .map(|p| format!("{} AS {}", p.expr, quote_ident(&p.name)))
            .collect();
        let sql = format!(
            "SELECT {}{} FROM {}{}",
            self.distinct_on(path)?,
            nonempty_list(select),
            self.from_sql(path)?,
            self.where_sql(path)?
        );
        Ok((sql, columns))
    }

    /// Aggregates over the whole path, a single row
    pub(crate) fn aggregate_query(
        &self,
        path: &EntityPath,
        items: &[ProjectionItem],
    ) -> ErmResult<(String, Vec<OutputColumn>)> {
        if items.is_empty() {
            return Err(ErmError::BadSyntax("aggregate requires at least one column".to_string()));
        }
        let aggs = items
            .iter()
            .map(|i| match &i.expr {
                ProjExpr::Aggregate { func, column } => {
                    self.plan_aggregate(path, *func, column, i.alias.as_deref())
                }
                _ => Err(ErmError::BadSyntax(
                    "aggregate projection allows only aggregate functions".to_string(),
                )),
            })
            .collect::<ErmResult<Vec<_>>>()?;
        let columns: Vec<OutputColumn> = aggs
            .iter()
            .map(|a| OutputColumn::new(a.name.clone(), a.ctype.clone()))
            .collect();
        check_unique_names(&columns)?;

        let mut inner = Vec::new();
        let mut outer = Vec::new();
        for (n, a) in aggs.iter().enumerate() {
            let staged = format!("_a{}", n);
            if let AggInput::Value(expr) = &a.input {
                inner.push(format!("{} AS {}", expr, quote_ident(&staged)));
            }
            outer.push(format!(
                "{} AS {}",
                a.call(&format!("s.{}", quote_ident(&staged))),
                quote_ident(&a.name)
            ));
        }
        let sql = format!(
            "SELECT {} FROM (SELECT {}{} FROM {}{}) s",
            outer.join(", "),
            self.distinct_on(path)?,
            nonempty_list(inner),
            self.from_sql(path)?,
            self.where_sql(path)?
        );
        Ok((sql, columns))
    }

    /// Group keys with aggregated extras and arbitrary-representative extras
    pub(crate) fn group_query(
        &self,
        path: &EntityPath,
        keys: &[ProjectionItem],
        extras: &[ProjectionItem],
    ) -> ErmResult<(String, Vec<OutputColumn>)> {
        let mut planned_keys = Vec::new();
        for item in keys {
            if matches!(item.expr, ProjExpr::Aggregate { .. }) {
                return Err(ErmError::BadSyntax("group keys cannot be aggregates".to_string()));
            }
            planned_keys.extend(self.plan_plain(path, item)?);
        }
        if planned_keys.is_empty() {
            return Err(ErmError::BadSyntax("grouping requires at least one key".to_string()));
        }
        let mut planned_extras = Vec::new();
        for item in extras {
            match &item.expr {
                ProjExpr::Aggregate { func, column } => planned_extras.push(Extra::Agg(
                    self.plan_aggregate(path, *func, column, item.alias.as_deref())?,
                )),
                _ => {
                    for p in self.plan_plain(path, item)? {
                        planned_extras.push(Extra::Plain(p));
                    }
                }
            }
        }

        let mut columns: Vec<OutputColumn> = planned_keys
            .iter()
            .map(|k| OutputColumn::new(k.name.clone(), k.ctype.clone()))
            .collect();
        for e in &planned_extras {
            columns.push(match e {
                Extra::Plain(p) => OutputColumn::new(p.name.clone(), p.ctype.clone()),
                Extra::Agg(a) => OutputColumn::new(a.name.clone(), a.ctype.clone()),
            });
        }
        check_unique_names(&columns)?;

        let key_names: Vec<String> = (0..planned_keys.len()).map(|n| format!("_k{}", n)).collect();
        let mut base = Vec::new();
        for (k, staged) in planned_keys.iter().zip(&key_names) {
            base.push(format!("{} AS {}", k.expr, quote_ident(staged)));
        }
        let mut group_select: Vec<String> = key_names.iter().map(|k| format!("r.{}", quote_ident(k))).collect();
        let mut side_select = group_select.clone();
        let mut output = Vec::new();
        for (k, staged) in planned_keys.iter().zip(&key_names) {
            output.push(format!("g.{} AS {}", quote_ident(staged), quote_ident(&k.name)));
        }
        for (n, e) in planned_extras.iter().enumerate() {
            let staged = format!("_e{}", n);
            match e {
                Extra::Plain(p) => {
                    base.push(format!("{} AS {}", p.expr, quote_ident(&staged)));
                    side_select.push(format!("r.{}", quote_ident(&staged)));
                    output.push(format!("e.{} AS {}", quote_ident(&staged), quote_ident(&p.name)));
                }
                Extra::Agg(a) => {
                    if let AggInput::Value(expr) = &a.input {
                        base.push(format!("{} AS {}", expr, quote_ident(&staged)));
                    }
                    group_select.push(format!(
                        "{} AS {}",
                        a.call(&format!("r.{}", quote_ident(&staged))),
                        quote_ident(&staged)
                    ));
                    output.push(format!("g.{} AS {}", quote_ident(&staged), quote_ident(&a.name)));
                }
            }
        }

        let group_by: Vec<String> = key_names.iter().map(|k| format!("r.{}", quote_ident(k))).collect();
        let mut sql = format!(
            "WITH r AS (SELECT {}{} FROM {}{}) SELECT {} FROM (SELECT {} FROM r GROUP BY {}) g",
            self.distinct_on(path)?,
            base.join(", "),
            self.from_sql(path)?,
            self.where_sql(path)?,
            output.join(", "),
            group_select.join(", "),
            group_by.join(", ")
        );
        if planned_extras.iter().any(|e| matches!(e, Extra::Plain(_))) {
            let join_on: Vec<String> = key_names
                .iter()
                .map(|k| format!("g.{k} IS NOT DISTINCT FROM e.{k}", k = quote_ident(k)))
                .collect();
            sql.push_str(&format!(
                " JOIN (SELECT DISTINCT ON ({}) {} FROM r) e ON ({})",
                group_by.join(", "),
                side_select.join(", "),
                join_on.join(" AND ")
            ));
        }
        Ok((sql, columns))
    }

    /// Plan a column or bin item; `*` expands to every visible column
    fn plan_plain(&self, path: &EntityPath, item: &ProjectionItem) -> ErmResult<Vec<Planned>> {
        let model = self.access().model();
        match &item.expr {
            ProjExpr::Column(name) => match self.resolver().resolve_column(path, name)? {
                ColumnTarget::FreeText(pos) => {
                    if item.alias.is_some() {
                        return Err(ErmError::BadSyntax("cannot alias the * column".to_string()));
                    }
                    let elem = path.element(pos);
                    Ok(model
                        .columns_of(elem.table)
                        .filter(|c| column_selectable(self.access(), c.id))
                        .map(|c| Planned {
                            expr: format!("{}.{}", elem.sql_alias(), c.sql_name()),
                            name: c.name.clone(),
                            ctype: c.ctype.clone(),
                        })
                        .collect())
                }
                ColumnTarget::Column(c) => {
                    self.access()
                        .enforce_right(ResourceId::Column(c.column), Right::Select, false)?;
                    let col = model.column(c.column);
                    Ok(vec![Planned {
                        expr: format!("{}.{}", path.element(c.element).sql_alias(), col.sql_name()),
                        name: item.alias.clone().unwrap_or_else(|| col.name.clone()),
                        ctype: col.ctype.clone(),
                    }])
                }
            },
            ProjExpr::Bin {
                column,
                nbins,
                min,
                max,
            } => {
                let (expr, ctype) = self.value_column(path, column)?;
                Ok(vec![Planned {
                    expr: bin_sql(&expr, &ctype, *nbins, min, max)?,
                    name: item.alias.clone().unwrap_or_else(|| name_tail(column)),
                    ctype: Type::scalar("jsonb"),
                }])
            }
            ProjExpr::Aggregate { .. } => Err(ErmError::BadSyntax(
                "aggregate functions require an aggregate or grouped projection".to_string(),
            )),
        }
    }

    fn plan_aggregate(
        &self,
        path: &EntityPath,
        func: AggFunc,
        column: &Name,
        alias: Option<&str>,
    ) -> ErmResult<PlannedAgg> {
        let name = alias
            .ok_or_else(|| {
                ErmError::BadSyntax(format!("aggregate {} requires an output alias", func.to_str()))
            })?
            .to_string();
        if let ColumnTarget::FreeText(_) = self.resolver().resolve_column(path, column)? {
            if func != AggFunc::Cnt {
                return Err(ErmError::BadSyntax(format!(
                    "aggregate {}(*) not supported",
                    func.to_str()
                )));
            }
            return Ok(PlannedAgg {
                func,
                input: AggInput::Rows,
                name,
                ctype: Type::scalar("int8"),
            });
        }
        let (expr, ctype) = self.value_column(path, column)?;
        let out = match func {
            AggFunc::Cnt | AggFunc::CntD => Type::scalar("int8"),
            AggFunc::Array | AggFunc::ArrayD => Type::scalar("jsonb"),
            AggFunc::Min | AggFunc::Max => {
                if ctype.is_array() || !(ctype.is_numeric() || ctype.is_text() || ctype.is_temporal()) {
                    return Err(unsupported(func, &ctype));
                }
                ctype.clone()
            }
            AggFunc::Avg | AggFunc::Sum => {
                if !ctype.is_numeric() {
                    return Err(unsupported(func, &ctype));
                }
                numeric_result(func, &ctype)
            }
        };
        Ok(PlannedAgg {
            func,
            input: AggInput::Value(expr),
            name,
            ctype: out,
        })
    }

    /// Expression and type of a named, selectable column
    fn value_column(&self, path: &EntityPath, name: &Name) -> ErmResult<(String, Type)> {
        match self.resolver().resolve_column(path, name)? {
            ColumnTarget::Column(c) => {
                self.access()
                    .enforce_right(ResourceId::Column(c.column), Right::Select, false)?;
                let col = self.access().model().column(c.column);
                Ok((
                    format!("{}.{}", path.element(c.element).sql_alias(), col.sql_name()),
                    col.ctype.clone(),
                ))
            }
            ColumnTarget::FreeText(_) => Err(ErmError::BadSyntax(
                "the * column is not valid here".to_string(),
            )),
        }
    }
}

fn unsupported(func: AggFunc, ctype: &Type) -> ErmError {
    ErmError::BadData(format!(
        "aggregate {} not supported for column type {}",
        func.to_str(),
        ctype
    ))
}

fn numeric_result(func: AggFunc, ctype: &Type) -> Type {
    let storage = ctype.storage_type();
    match (func, storage.scalar_name()) {
        (_, "float4") | (_, "float8") => Type::scalar("float8"),
        (AggFunc::Sum, "int2") | (AggFunc::Sum, "int4") => Type::scalar("int8"),
        _ => Type::scalar("numeric"),
    }
}

fn name_tail(name: &Name) -> String {
    name.parts().last().cloned().unwrap_or_default()
}
