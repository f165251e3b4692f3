//! Name and link resolution
//!
//! Resolution is pure and synchronous. Names that do not exist, or exist
//! but are not visible to the client, are both reported as model conflicts
//! so the error does not reveal hidden structure.

use std::collections::BTreeSet;

use super::ast::{ElementInput, FilterExpr, Name, Operand, Operator, PathItem};
use super::predicate::{ColumnRef, ColumnTarget, Predicate};
use super::{Direction, EntityPath, Link, LinkEdge, PathElement};
use crate::catalog::{AccessContext, ColumnId, ResourceId, Right, TableId};
use crate::config::LinkPolicy;
use crate::error::{ErmError, ErmResult};

/// Column named in a link, with the path element it was found in
///
/// `element` is `None` for a column of a table that is not yet in the path.
struct LinkColumn {
    element: Option<usize>,
    table: TableId,
    column: ColumnId,
}

/// Binds parsed paths to a model for one client
pub struct Resolver<'a, 'm> {
    access: &'a AccessContext<'m>,
    policy: LinkPolicy,
}

impl<'a, 'm> Resolver<'a, 'm> {
    pub fn new(access: &'a AccessContext<'m>) -> Self {
        Resolver {
            access,
            policy: LinkPolicy::default(),
        }
    }

    /// Builder: set how ambiguous implicit links are treated
    #[must_use]
    pub fn with_policy(mut self, policy: LinkPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn access(&self) -> &'a AccessContext<'m> {
        self.access
    }

    /// Resolve a complete path
    pub fn resolve(&self, items: &[PathItem]) -> ErmResult<EntityPath> {
        let mut path = EntityPath::default();
        for item in items {
            self.push(&mut path, item)?;
        }
        if path.is_empty() {
            return Err(ErmError::BadSyntax("path must name at least one table".to_string()));
        }
        Ok(path)
    }

    /// Extend a path by one item
    pub fn push(&self, path: &mut EntityPath, item: &PathItem) -> ErmResult<()> {
        match item {
            PathItem::Element(e) => self.push_element(path, e),
            PathItem::Filter(f) => {
                if path.is_empty() {
                    return Err(ErmError::BadSyntax("filter requires a table context".to_string()));
                }
                let predicate = self.resolve_filter(path, f)?;
                let cur = path.current;
                path.elements[cur].filters.push(predicate);
                Ok(())
            }
            PathItem::Context(alias) => {
                path.current = path.alias(alias).ok_or_else(|| {
                    ErmError::ConflictModel(format!("Alias \"{}\" not bound in path", alias))
                })?;
                Ok(())
            }
        }
    }

    fn push_element(&self, path: &mut EntityPath, e: &ElementInput) -> ErmResult<()> {
        if let Some(alias) = &e.alias {
            if path.aliases.contains_key(alias) {
                return Err(ErmError::BadData(format!(
                    "Alias \"{}\" bound more than once in path",
                    alias
                )));
            }
        }

        let (table, link, context_pos) = if path.is_empty() {
            match (&e.table, &e.left, &e.outer) {
                (Some(name), None, None) => (self.resolve_table(name)?, None, None),
                _ => {
                    return Err(ErmError::BadSyntax(
                        "path must start with a table name".to_string(),
                    ))
                }
            }
        } else {
            match (&e.table, &e.left, &e.right) {
                (Some(name), None, None) => {
                    let target = self.resolve_table(name)?;
                    let ctx = path.current;
                    let link = self.implicit_link(path.element(ctx).table, target)?;
                    (target, link, Some(ctx))
                }
                (None, Some(cols), None) => self.column_link(path, cols)?,
                (None, Some(left), Some(right)) => self.explicit_link(path, left, right)?,
                _ => return Err(ErmError::BadSyntax("malformed path element".to_string())),
            }
        };

        let model = self.access.model();
        if let Some(link) = &link {
            tracing::debug!(
                from = %context_pos.map(|p| model.table_display(path.element(p).table)).unwrap_or_default(),
                to = %model.table_display(table),
                link = ?link,
                "resolved link"
            );
        }

        let pos = path.elements.len();
        path.elements.push(PathElement {
            pos,
            table,
            alias: e.alias.clone(),
            link,
            context_pos,
            outer: e.outer,
            filters: Vec::new(),
        });
        if let Some(alias) = &e.alias {
            path.aliases.insert(alias.clone(), pos);
        }
        path.current = pos;
        Ok(())
    }

    /// Resolve `table` or `schema:table` to a visible table
    pub fn resolve_table(&self, name: &Name) -> ErmResult<TableId> {
        let model = self.access.model();
        match name.parts() {
            [t] => self.access.lookup_table(t),
            [s, t] => {
                let table = model.table_by_name(s, t)?;
                if !self.access.enumerable(ResourceId::Table(table.id)) {
                    return Err(ErmError::ConflictModel(format!(
                        "Table \"{}\" does not exist in schema \"{}\"",
                        t, s
                    )));
                }
                Ok(table.id)
            }
            _ => Err(ErmError::BadSyntax(format!("invalid table name \"{}\"", name))),
        }
    }

    fn choose(&self, edges: Vec<LinkEdge>, what: impl FnOnce() -> String) -> ErmResult<Link> {
        let model = self.access.model();
        match edges.len() {
            0 => Err(ErmError::ConflictModel(format!("no link found {}", what()))),
            1 => Ok(Link::Edges(edges)),
            _ => {
                let pairs: BTreeSet<(TableId, TableId)> = edges
                    .iter()
                    .map(|e| {
                        let (a, b) = (e.source_table(model), e.target_table(model));
                        (a.min(b), a.max(b))
                    })
                    .collect();
                if self.policy == LinkPolicy::Disjunction
                    && pairs.len() == 1
                    && self.access.keyrefs_enumerable(&edges.iter().map(|e| e.keyref).collect::<Vec<_>>())
                {
                    Ok(Link::Edges(edges))
                } else {
                    Err(ErmError::ConflictModel(format!("ambiguous links found {}", what())))
                }
            }
        }
    }

    fn implicit_link(&self, from: TableId, to: TableId) -> ErmResult<Option<Link>> {
        let model = self.access.model();
        let describe = || format!("between {} and {}", model.table_display(from), model.table_display(to));
        if from == to {
            return Err(ErmError::ConflictModel(format!(
                "implicit link of table {} to itself is ambiguous; name the link columns",
                model.table_display(from)
            )));
        }
        let t = model.table(from);
        let mut edges: Vec<LinkEdge> = t
            .outbound
            .iter()
            .filter(|k| model.keyref_to_table(**k) == to)
            .map(|k| LinkEdge {
                keyref: *k,
                direction: Direction::Outbound,
            })
            .collect();
        edges.extend(
            t.inbound
                .iter()
                .filter(|k| model.keyref_from_table(**k) == to)
                .map(|k| LinkEdge {
                    keyref: *k,
                    direction: Direction::Inbound,
                }),
        );
        edges.retain(|e| self.access.enumerable(ResourceId::KeyRef(e.keyref)));
        self.choose(edges, describe).map(Some)
    }

    fn link_column(&self, path: &EntityPath, name: &Name, new_side: bool) -> ErmResult<LinkColumn> {
        let (element, table, cname) = match name.parts() {
            [c] if !new_side => (Some(path.current), path.element(path.current).table, c),
            [a, c] if path.alias(a).is_some() && !new_side => {
                let pos = path.alias(a).unwrap_or(path.current);
                (Some(pos), path.element(pos).table, c)
            }
            [t, c] => {
                let table = self.access.lookup_table(t)?;
                (self.context_element(path, table, new_side), table, c)
            }
            [s, t, c] => {
                let table = self.resolve_table(&Name::new([s.clone(), t.clone()]))?;
                (self.context_element(path, table, new_side), table, c)
            }
            _ => {
                return Err(ErmError::BadSyntax(format!(
                    "invalid link column name \"{}\"",
                    name
                )))
            }
        };
        let column = self.visible_column(table, cname)?;
        Ok(LinkColumn {
            element,
            table,
            column,
        })
    }

    fn context_element(&self, path: &EntityPath, table: TableId, new_side: bool) -> Option<usize> {
        if !new_side && path.element(path.current).table == table {
            Some(path.current)
        } else {
            None
        }
    }

    fn visible_column(&self, table: TableId, name: &str) -> ErmResult<ColumnId> {
        let model = self.access.model();
        let col = model.column_by_name(table, name)?;
        if !self.access.enumerable(ResourceId::Column(col.id)) {
            return Err(ErmError::ConflictModel(format!(
                "Column \"{}\" does not exist in table \"{}\"",
                name,
                model.table(table).name
            )));
        }
        Ok(col.id)
    }

    fn same_origin(cols: &[LinkColumn]) -> ErmResult<(Option<usize>, TableId)> {
        let first = cols
            .first()
            .ok_or_else(|| ErmError::BadSyntax("link column list is empty".to_string()))?;
        if cols
            .iter()
            .any(|c| c.element != first.element || c.table != first.table)
        {
            return Err(ErmError::BadSyntax(
                "link columns must all come from one table".to_string(),
            ));
        }
        Ok((first.element, first.table))
    }

    fn column_link(
        &self,
        path: &EntityPath,
        names: &[Name],
    ) -> ErmResult<(TableId, Option<Link>, Option<usize>)> {
        let model = self.access.model();
        let cols = names
            .iter()
            .map(|n| self.link_column(path, n, false))
            .collect::<ErmResult<Vec<_>>>()?;
        let (element, table) = Self::same_origin(&cols)?;
        let set: BTreeSet<ColumnId> = cols.iter().map(|c| c.column).collect();
        let describe = || {
            let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
            format!("for columns ({})", names.join(","))
        };

        let mut edges = Vec::new();
        let context_pos = match element {
            Some(pos) => {
                // columns in the path context: traverse from their table
                let t = model.table(table);
                if let Some(fk) = t.fkeys.get(&set) {
                    for k in model.foreign_key(*fk).references.values().flatten() {
                        edges.push(LinkEdge {
                            keyref: *k,
                            direction: Direction::Outbound,
                        });
                    }
                }
                if let Some(u) = t.uniques.get(&set) {
                    for k in model.unique(*u).table_references.values().flatten() {
                        edges.push(LinkEdge {
                            keyref: *k,
                            direction: Direction::Inbound,
                        });
                    }
                }
                pos
            }
            None => {
                // columns of the new table: find edges from the context to them
                let ctx = path.current;
                let ctx_table = model.table(path.element(ctx).table);
                for k in &ctx_table.outbound {
                    let kr = model.keyref(*k);
                    if model.keyref_to_table(*k) == table
                        && kr.pairs.iter().map(|(_, p)| *p).collect::<BTreeSet<_>>() == set
                    {
                        edges.push(LinkEdge {
                            keyref: *k,
                            direction: Direction::Outbound,
                        });
                    }
                }
                for k in &ctx_table.inbound {
                    let kr = model.keyref(*k);
                    if model.keyref_from_table(*k) == table
                        && kr.pairs.iter().map(|(f, _)| *f).collect::<BTreeSet<_>>() == set
                    {
                        edges.push(LinkEdge {
                            keyref: *k,
                            direction: Direction::Inbound,
                        });
                    }
                }
                ctx
            }
        };
        edges.retain(|e| self.access.enumerable(ResourceId::KeyRef(e.keyref)));
        let link = self.choose(edges, describe)?;
        let target = match &link {
            Link::Edges(edges) => edges[0].target_table(model),
            Link::Explicit(_) => table,
        };
        Ok((target, Some(link), Some(context_pos)))
    }

    fn explicit_link(
        &self,
        path: &EntityPath,
        left: &[Name],
        right: &[Name],
    ) -> ErmResult<(TableId, Option<Link>, Option<usize>)> {
        if left.len() != right.len() || left.is_empty() {
            return Err(ErmError::BadSyntax(format!(
                "link column lists must have equal, non-zero lengths, got {} and {}",
                left.len(),
                right.len()
            )));
        }
        let model = self.access.model();
        let lcols = left
            .iter()
            .map(|n| self.link_column(path, n, false))
            .collect::<ErmResult<Vec<_>>>()?;
        let rcols = right
            .iter()
            .map(|n| self.link_column(path, n, true))
            .collect::<ErmResult<Vec<_>>>()?;
        let (lelem, ltable) = Self::same_origin(&lcols)?;
        let (_, rtable) = Self::same_origin(&rcols)?;
        let ctx = lelem.ok_or_else(|| {
            ErmError::ConflictModel("left columns of link must belong to the path context".to_string())
        })?;

        let wanted: BTreeSet<(ColumnId, ColumnId)> = lcols
            .iter()
            .zip(rcols.iter())
            .map(|(l, r)| (l.column, r.column))
            .collect();
        let t = model.table(ltable);
        let mut edges: Vec<LinkEdge> = Vec::new();
        for k in &t.outbound {
            let pairs: BTreeSet<_> = model.keyref(*k).pairs.iter().copied().collect();
            if model.keyref_to_table(*k) == rtable && pairs == wanted {
                edges.push(LinkEdge {
                    keyref: *k,
                    direction: Direction::Outbound,
                });
            }
        }
        for k in &t.inbound {
            let pairs: BTreeSet<_> = model.keyref(*k).pairs.iter().map(|(f, p)| (*p, *f)).collect();
            if model.keyref_from_table(*k) == rtable && pairs == wanted {
                edges.push(LinkEdge {
                    keyref: *k,
                    direction: Direction::Inbound,
                });
            }
        }
        edges.retain(|e| self.access.enumerable(ResourceId::KeyRef(e.keyref)));

        if !edges.is_empty() {
            let link = self.choose(edges, || "for explicit link columns".to_string())?;
            return Ok((rtable, Some(link), Some(ctx)));
        }

        // no constraint matches: plain equi-join on the named columns
        let mut pairs = Vec::new();
        for (l, r) in lcols.iter().zip(rcols.iter()) {
            let (lc, rc) = (model.column(l.column), model.column(r.column));
            if lc.ctype.storage_type() != rc.ctype.storage_type() {
                return Err(ErmError::ConflictModel(format!(
                    "link column {} type {} does not match {} type {}",
                    lc.name, lc.ctype, rc.name, rc.ctype
                )));
            }
            for c in [l.column, r.column] {
                self.access.enforce_right(ResourceId::Column(c), Right::Select, false)?;
            }
            pairs.push((l.column, r.column));
        }
        Ok((rtable, Some(Link::Explicit(pairs)), Some(ctx)))
    }

    /// Resolve a 1 to 3 part column name against the path
    pub fn resolve_column(&self, path: &EntityPath, name: &Name) -> ErmResult<ColumnTarget> {
        if path.is_empty() {
            return Err(ErmError::BadSyntax("column name requires a table context".to_string()));
        }
        match name.parts() {
            [c] => self.element_column(path, path.current, c),
            [a, c] => match path.alias(a) {
                Some(pos) => self.element_column(path, pos, c),
                None => {
                    let table = self.access.lookup_table(a)?;
                    self.table_column(path, table, c)
                }
            },
            [s, t, c] => {
                let table = self.resolve_table(&Name::new([s.clone(), t.clone()]))?;
                self.table_column(path, table, c)
            }
            _ => Err(ErmError::BadSyntax(format!(
                "column name \"{}\" must have one to three parts",
                name
            ))),
        }
    }

    fn element_column(&self, path: &EntityPath, pos: usize, name: &str) -> ErmResult<ColumnTarget> {
        if name == "*" {
            return Ok(ColumnTarget::FreeText(pos));
        }
        let column = self.visible_column(path.element(pos).table, name)?;
        Ok(ColumnTarget::Column(ColumnRef {
            element: pos,
            column,
        }))
    }

    fn table_column(&self, path: &EntityPath, table: TableId, name: &str) -> ErmResult<ColumnTarget> {
        if path.element(path.current).table != table {
            return Err(ErmError::ConflictModel(format!(
                "Table {} is not the path context",
                self.access.model().table_display(table)
            )));
        }
        self.element_column(path, path.current, name)
    }

    /// Resolve a filter tree against the current path context
    pub fn resolve_filter(&self, path: &EntityPath, expr: &FilterExpr) -> ErmResult<Predicate> {
        match expr {
            FilterExpr::Compare { name, op, operand } => {
                let target = self.resolve_column(path, name)?;
                match (op, operand) {
                    (Operator::Null, Operand::None) => {}
                    (Operator::Null, _) => {
                        return Err(ErmError::BadSyntax(
                            "operator null takes no operand".to_string(),
                        ))
                    }
                    (_, Operand::None) => {
                        return Err(ErmError::BadSyntax(format!(
                            "operator {} requires an operand",
                            op.to_str()
                        )))
                    }
                    (_, Operand::Set { values, .. }) if values.is_empty() => {
                        return Err(ErmError::BadSyntax(format!(
                            "operator {} requires at least one value",
                            op.to_str()
                        )))
                    }
                    _ => {}
                }
                match target {
                    ColumnTarget::FreeText(_) if !op.is_text_op() => {
                        return Err(ErmError::BadSyntax(format!(
                            "operator {} not supported for the free-text column",
                            op.to_str()
                        )))
                    }
                    ColumnTarget::Column(c) => {
                        self.access
                            .enforce_right(ResourceId::Column(c.column), Right::Select, false)?;
                    }
                    ColumnTarget::FreeText(_) => {}
                }
                Ok(Predicate::Compare {
                    target,
                    op: *op,
                    operand: operand.clone(),
                })
            }
            FilterExpr::Not(inner) => Ok(Predicate::Not(Box::new(self.resolve_filter(path, inner)?))),
            FilterExpr::And(items) | FilterExpr::Or(items) => {
                if items.is_empty() {
                    return Err(ErmError::BadSyntax("empty filter group".to_string()));
                }
                let resolved = items
                    .iter()
                    .map(|i| self.resolve_filter(path, i))
                    .collect::<ErmResult<Vec<_>>>()?;
                Ok(match expr {
                    FilterExpr::And(_) => Predicate::And(resolved),
                    _ => Predicate::Or(resolved),
                })
            }
        }
    }
}
