//! Read query compilation
//!
//! The compiler turns a resolved [`EntityPath`] plus a [`ReadRequest`] into
//! one SQL statement and an output column descriptor. Every element of the
//! path becomes a join alias `t0..tn`; filters accumulate into the WHERE
//! clause; dynamic ACLs are folded in as gated table sources and guarded
//! column values. Sorting and keyset paging wrap the result.

pub mod authz;
pub mod bin;
pub mod explain;
pub mod paging;
pub mod predicate;
pub mod projection;

use serde::Deserialize;

use crate::catalog::{AccessContext, ColumnId, ResourceId, Right, TableId, Type};
use crate::error::{ErmError, ErmResult};
use crate::path::ast::{PageBound, ProjectionItem, SortKey};
use crate::path::{EntityPath, Resolver};
use crate::sql::{and_all, or_any};

use authz::{column_selectable, table_source_sql};
use predicate::predicate_sql;

pub use explain::explain;

/// What a read returns
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Whole rows of the context element
    Entity,
    /// Projected columns, one row per context entity
    Attribute(Vec<ProjectionItem>),
    /// Group keys plus aggregated or arbitrary extras
    AttributeGroup {
        keys: Vec<ProjectionItem>,
        #[serde(default)]
        extras: Vec<ProjectionItem>,
    },
    /// Aggregates over the whole path, one row
    Aggregate(Vec<ProjectionItem>),
}

/// A read request over a resolved path
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReadRequest {
    pub kind: QueryKind,
    #[serde(default)]
    pub sort: Vec<SortKey>,
    #[serde(default)]
    pub page: Option<PageBound>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl ReadRequest {
    pub fn new(kind: QueryKind) -> Self {
        ReadRequest {
            kind,
            sort: Vec::new(),
            page: None,
            limit: None,
        }
    }

    pub fn entity() -> Self {
        Self::new(QueryKind::Entity)
    }

    #[must_use]
    pub fn sort(mut self, keys: Vec<SortKey>) -> Self {
        self.sort = keys;
        self
    }

    #[must_use]
    pub fn page(mut self, bound: PageBound) -> Self {
        self.page = Some(bound);
        self
    }

    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }
}

/// One output column
#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    pub name: String,
    pub ctype: Type,
}

impl OutputColumn {
    pub fn new(name: impl Into<String>, ctype: Type) -> Self {
        OutputColumn {
            name: name.into(),
            ctype,
        }
    }
}

/// A compiled read
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub columns: Vec<OutputColumn>,
}

impl CompiledQuery {
    /// Row count of the query, for existence checks
    pub fn count_sql(&self) -> String {
        format!("SELECT count(*) FROM ({}) s", self.sql)
    }
}

/// Compiles reads for one client and model snapshot
pub struct Compiler<'a, 'm> {
    resolver: Resolver<'a, 'm>,
}

impl<'a, 'm> Compiler<'a, 'm> {
    pub fn new(resolver: Resolver<'a, 'm>) -> Self {
        Compiler { resolver }
    }

    pub fn resolver(&self) -> &Resolver<'a, 'm> {
        &self.resolver
    }

    pub fn access(&self) -> &'a AccessContext<'m> {
        self.resolver.access()
    }

    /// Compile a read over `path`
    pub fn compile_read(&self, path: &EntityPath, req: &ReadRequest) -> ErmResult<CompiledQuery> {
        if path.is_empty() {
            return Err(ErmError::BadSyntax("path must name at least one table".to_string()));
        }
        for e in path.elements() {
            self.access()
                .enforce_right(ResourceId::Table(e.table), Right::Select, false)?;
        }

        let (inner, columns) = match &req.kind {
            QueryKind::Entity => self.entity_query(path)?,
            QueryKind::Attribute(items) => self.attribute_query(path, items)?,
            QueryKind::AttributeGroup { keys, extras } => self.group_query(path, keys, extras)?,
            QueryKind::Aggregate(items) => {
                if !req.sort.is_empty() || req.page.is_some() {
                    return Err(ErmError::BadSyntax(
                        "sort and paging not supported for aggregates".to_string(),
                    ));
                }
                let (sql, columns) = self.aggregate_query(path, items)?;
                let sql = match req.limit {
                    Some(n) => format!("{} LIMIT {}", sql, n),
                    None => sql,
                };
                return Ok(self.finish(sql, columns));
            }
        };
        check_unique_names(&columns)?;
        let sql = paging::wrap_sorted(&inner, &columns, &req.sort, req.page.as_ref(), req.limit)?;
        Ok(self.finish(sql, columns))
    }

    fn finish(&self, sql: String, columns: Vec<OutputColumn>) -> CompiledQuery {
        tracing::debug!(
            catalog = %self.access().model().catalog_id(),
            columns = columns.len(),
            "compiled read"
        );
        CompiledQuery { sql, columns }
    }

    fn entity_query(&self, path: &EntityPath) -> ErmResult<(String, Vec<OutputColumn>)> {
        let model = self.access().model();
        let elem = path
            .current_element()
            .ok_or_else(|| ErmError::BadSyntax("path has no context".to_string()))?;
        let alias = elem.sql_alias();
        let cols: Vec<ColumnId> = model
            .columns_of(elem.table)
            .filter(|c| column_selectable(self.access(), c.id))
            .map(|c| c.id)
            .collect();
        let select = cols
            .iter()
            .map(|c| {
                let col = model.column(*c);
                format!("{}.{} AS {}", alias, col.sql_name(), col.sql_name())
            })
            .collect::<Vec<_>>();
        let columns = cols
            .iter()
            .map(|c| {
                let col = model.column(*c);
                OutputColumn::new(col.name.clone(), col.ctype.clone())
            })
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

    /// FROM clause joining every path element
    pub(crate) fn from_sql(&self, path: &EntityPath) -> ErmResult<String> {
        let model = self.access().model();
        let mut parts = Vec::with_capacity(path.len());
        for e in path.elements() {
            let source = table_source_sql(self.access(), e.table, &e.sql_alias())?;
            match (&e.link, e.context_pos) {
                (Some(link), Some(ctx)) => {
                    let ctx_alias = path.element(ctx).sql_alias();
                    let disjuncts: Vec<String> = link
                        .disjuncts(model)
                        .iter()
                        .map(|pairs| {
                            and_all(
                                &pairs
                                    .iter()
                                    .map(|(l, r)| {
                                        format!(
                                            "{}.{} = {}.{}",
                                            ctx_alias,
                                            model.column(*l).sql_name(),
                                            e.sql_alias(),
                                            model.column(*r).sql_name()
                                        )
                                    })
                                    .collect::<Vec<_>>(),
                            )
                        })
                        .collect();
                    let join = e.outer.map(|o| o.sql()).unwrap_or("JOIN");
                    parts.push(format!("{} {} ON ({})", join, source, or_any(&disjuncts)));
                }
                _ => parts.push(source),
            }
        }
        Ok(parts.join(" "))
    }

    /// WHERE clause for every accumulated filter, or empty
    pub(crate) fn where_sql(&self, path: &EntityPath) -> ErmResult<String> {
        let clauses = path
            .elements()
            .iter()
            .flat_map(|e| e.filters.iter())
            .map(|p| predicate_sql(self.access(), path, p))
            .collect::<ErmResult<Vec<_>>>()?;
        if clauses.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!(" WHERE {}", and_all(&clauses)))
        }
    }

    /// `DISTINCT ON (...) ` over the context element key, or empty
    pub(crate) fn distinct_on(&self, path: &EntityPath) -> ErmResult<String> {
        if path.len() < 2 {
            return Ok(String::new());
        }
        let elem = path
            .current_element()
            .ok_or_else(|| ErmError::BadSyntax("path has no context".to_string()))?;
        let model = self.access().model();
        let exprs: Vec<String> = distinct_key(self.access(), elem.table)
            .iter()
            .map(|c| format!("{}.{}", elem.sql_alias(), model.column(*c).sql_name()))
            .collect();
        if exprs.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("DISTINCT ON ({}) ", exprs.join(", ")))
    }
}

/// Shortest selectable non-null unique key, else every visible column
pub fn distinct_key(access: &AccessContext<'_>, table: TableId) -> Vec<ColumnId> {
    let model = access.model();
    let t = model.table(table);
    t.uniques
        .keys()
        .filter(|cols| {
            cols.iter().all(|c| {
                let col = model.column(*c);
                !col.nullok && column_selectable(access, *c)
            })
        })
        .min_by_key(|cols| cols.len())
        .map(|cols| cols.iter().copied().collect())
        .unwrap_or_else(|| {
            model
                .columns_of(table)
                .filter(|c| column_selectable(access, c.id))
                .map(|c| c.id)
                .collect()
        })
}

/// Reject duplicate output names
pub(crate) fn check_unique_names(columns: &[OutputColumn]) -> ErmResult<()> {
    let mut seen = std::collections::BTreeSet::new();
    for c in columns {
        if !seen.insert(c.name.as_str()) {
            return Err(ErmError::BadSyntax(format!(
                "output column name \"{}\" used more than once",
                c.name
            )));
        }
    }
    Ok(())
}

fn nonempty_list(items: Vec<String>) -> String {
    if items.is_empty() {
        "NULL".to_string()
    } else {
        items.join(", ")
    }
}
