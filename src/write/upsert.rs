//! Entity upsert and attribute update planning

use serde::Deserialize;

use crate::catalog::{AccessContext, ColumnId, KeyRefId, Model, ResourceId, Right, TableId};
use crate::compiler::authz::{dynacl_clauses, dynauthz_restricted, negative, positive, table_source_sql};
use crate::error::{ErmError, ErmResult};
use crate::path::EntityPath;
use crate::sql::{and_all, quote_ident};
use crate::write::{
    column_list, drop_table, keymatch, writable_table, Batch, Flag, Statement, WritePlan, INPUT_TABLE,
};

/// Columns reset to their defaults by every update
const MAINTENANCE_COLUMNS: [&str; 2] = ["RMT", "RMB"];

/// Handling of input rows that do or do not match stored rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct UpsertOptions {
    #[serde(default)]
    pub allow_existing: Flag,
    #[serde(default)]
    pub allow_missing: Flag,
}

impl UpsertOptions {
    pub fn new(allow_existing: Flag, allow_missing: Flag) -> Self {
        UpsertOptions {
            allow_existing,
            allow_missing,
        }
    }
}

/// Input rows correlated with a table on a set of key columns
struct Correlation<'a, 'm> {
    access: &'a AccessContext<'m>,
    table: TableId,
    keys: Vec<ColumnId>,
    values: Vec<ColumnId>,
}

impl<'a, 'm> Correlation<'a, 'm> {
    fn model(&self) -> &'m Model {
        self.access.model()
    }

    fn table_sql(&self) -> String {
        self.model().table_sql_name(self.table)
    }

    fn matched(&self) -> String {
        format!(
            "EXISTS (SELECT 1 FROM {} t WHERE {})",
            self.table_sql(),
            keymatch(self.model(), &self.keys, "t", "i")
        )
    }

    /// Input rows in `scope`, further narrowed by `extra`
    fn rows_where(&self, scope: Scope, extra: &[String]) -> String {
        let mut clauses = Vec::new();
        match scope {
            Scope::Matched => clauses.push(self.matched()),
            Scope::Missing => clauses.push(format!("NOT {}", self.matched())),
        }
        clauses.extend(extra.iter().cloned());
        format!(
            "SELECT 1 FROM {} i WHERE {} LIMIT 1",
            quote_ident(INPUT_TABLE),
            and_all(&clauses)
        )
    }

    fn denied(&self, what: String) -> ErmError {
        ErmError::denied(what, self.access.is_anonymous())
    }

    fn guard(&self, scope: Scope, extra: &[String], on_rows: ErmError) -> Statement {
        Statement::Guard {
            sql: self.rows_where(scope, extra),
            on_rows,
        }
    }

    /// Stored rows joined to their input rows where `clauses` all fail
    fn dynamic_guard(&self, clauses: &[String], on_rows: ErmError) -> Statement {
        Statement::Guard {
            sql: format!(
                "SELECT 1 FROM {} t JOIN {} i ON ({}) WHERE {} LIMIT 1",
                self.table_sql(),
                quote_ident(INPUT_TABLE),
                keymatch(self.model(), &self.keys, "t", "i"),
                negative(clauses)
            ),
            on_rows,
        }
    }

    fn input_columns(&self) -> Vec<ColumnId> {
        self.keys.iter().chain(&self.values).copied().collect()
    }

    /// Outbound references fully present in the input with a column in `changing`
    fn affected_keyrefs(&self, changing: &[ColumnId]) -> Vec<KeyRefId> {
        let model = self.model();
        let present = self.input_columns();
        model
            .table(self.table)
            .outbound
            .iter()
            .copied()
            .filter(|k| {
                let pairs = &model.keyref(*k).pairs;
                pairs.iter().all(|(fk, _)| present.contains(fk))
                    && pairs.iter().any(|(fk, _)| changing.contains(fk))
            })
            .collect()
    }

    fn keyref_name(&self, k: KeyRefId) -> String {
        self.model().resource_display(ResourceId::KeyRef(k))
    }

    /// Guards for references carried by the rows in `scope`
    fn keyref_guards(&self, k: KeyRefId, right: Right, scope: Scope) -> ErmResult<Vec<Statement>> {
        let model = self.model();
        let kr = model.keyref(k);
        let nonnull: Vec<String> = kr
            .pairs
            .iter()
            .map(|(fk, _)| format!("i.{} IS NOT NULL", model.column(*fk).sql_name()))
            .collect();
        let what = format!("{} access on {}", right, self.keyref_name(k));
        match self.access.has_right(ResourceId::KeyRef(k), right) {
            Some(true) => Ok(Vec::new()),
            Some(false) => Ok(vec![self.guard(scope, &nonnull, self.denied(what))]),
            None => {
                let to = model.keyref_to_table(k);
                let domain = table_source_sql(self.access, to, "d")?;
                let mut cond: Vec<String> = kr
                    .pairs
                    .iter()
                    .map(|(fk, pk)| {
                        format!(
                            "d.{} = i.{}",
                            model.column(*pk).sql_name(),
                            model.column(*fk).sql_name()
                        )
                    })
                    .collect();
                cond.push(positive(&dynacl_clauses(self.access, ResourceId::KeyRef(k), right, "d")?));
                let mut extra = nonnull;
                extra.push(format!(
                    "NOT EXISTS (SELECT 1 FROM {} WHERE {})",
                    domain,
                    and_all(&cond)
                ));
                Ok(vec![self.guard(scope, &extra, self.denied(what))])
            }
        }
    }

    /// Guards proving every matched row may have `values` updated
    fn update_guards(&self) -> ErmResult<Vec<Statement>> {
        let model = self.model();
        let mut out = Vec::new();
        let table_res = ResourceId::Table(self.table);
        let display = model.table_display(self.table);
        match self.access.has_right(table_res, Right::Update) {
            Some(true) => {}
            Some(false) => out.push(self.guard(
                Scope::Matched,
                &[],
                self.denied(format!("update access on table {}", display)),
            )),
            None => {
                let clauses = dynacl_clauses(self.access, table_res, Right::Update, "t")?;
                out.push(self.dynamic_guard(
                    &clauses,
                    self.denied(format!("update access on one or more rows in table {}", display)),
                ));
            }
        }
        for c in &self.values {
            let res = ResourceId::Column(*c);
            let name = &model.column(*c).name;
            match self.access.has_right(res, Right::Update) {
                Some(true) => {}
                Some(false) => out.push(self.guard(
                    Scope::Matched,
                    &[],
                    self.denied(format!("update access on column {}:{}", display, name)),
                )),
                None if dynauthz_restricted(self.access, *c, Right::Update) => {
                    let clauses = dynacl_clauses(self.access, res, Right::Update, "t")?;
                    out.push(self.dynamic_guard(
                        &clauses,
                        self.denied(format!(
                            "update access on column {}:{} for one or more rows",
                            display, name
                        )),
                    ));
                }
                None => {}
            }
        }
        for k in self.affected_keyrefs(&self.values) {
            out.extend(self.keyref_guards(k, Right::Update, Scope::Matched)?);
        }
        Ok(out)
    }

    /// Guards proving every unmatched row may be inserted
    fn insert_guards(&self) -> ErmResult<Vec<Statement>> {
        let model = self.model();
        let mut out = Vec::new();
        let display = model.table_display(self.table);
        if self.access.has_right(ResourceId::Table(self.table), Right::Insert) != Some(true) {
            out.push(self.guard(
                Scope::Missing,
                &[],
                self.denied(format!("insert access on table {}", display)),
            ));
        }
        let cols = self.input_columns();
        for c in &cols {
            if self.access.has_right(ResourceId::Column(*c), Right::Insert) != Some(true) {
                out.push(self.guard(
                    Scope::Missing,
                    &[],
                    self.denied(format!(
                        "insert access on column {}:{}",
                        display,
                        model.column(*c).name
                    )),
                ));
            }
        }
        for k in self.affected_keyrefs(&cols) {
            out.extend(self.keyref_guards(k, Right::Insert, Scope::Missing)?);
        }
        Ok(out)
    }

    fn unique_index(&self) -> Statement {
        Statement::Unique {
            sql: format!(
                "CREATE UNIQUE INDEX ON {} ({})",
                quote_ident(INPUT_TABLE),
                column_list(self.model(), &self.keys, None)
            ),
            on_violation: ErmError::ConflictData(
                "multiple input rows share the same unique key information".to_string(),
            ),
        }
    }

    fn update_sql(&self) -> String {
        let model = self.model();
        let mut assigns: Vec<String> = self
            .values
            .iter()
            .map(|c| {
                let n = model.column(*c).sql_name();
                format!("{} = i.{}", n, n)
            })
            .collect();
        for name in MAINTENANCE_COLUMNS {
            if let Some(c) = model.table(self.table).column_id(name) {
                if !self.values.contains(&c) {
                    assigns.push(format!("{} = DEFAULT", model.column(c).sql_name()));
                }
            }
        }
        format!(
            "UPDATE {} t SET {} FROM {} i WHERE {} RETURNING t.*",
            self.table_sql(),
            assigns.join(", "),
            quote_ident(INPUT_TABLE),
            keymatch(model, &self.keys, "t", "i")
        )
    }

    fn insert_sql(&self) -> String {
        let cols = self.input_columns();
        format!(
            "INSERT INTO {} ({}) SELECT {} FROM {} i WHERE NOT {} ON CONFLICT DO NOTHING RETURNING *",
            self.table_sql(),
            column_list(self.model(), &cols, None),
            column_list(self.model(), &cols, Some("i")),
            quote_ident(INPUT_TABLE),
            self.matched()
        )
    }
}

#[derive(Debug, Clone, Copy)]
enum Scope {
    Matched,
    Missing,
}

/// Split input columns into key columns and the rest, dropping system columns
pub fn split_columns(model: &Model, table: TableId, input: &[ColumnId]) -> (Vec<ColumnId>, Vec<ColumnId>) {
    let keyed: Vec<ColumnId> = model
        .table(table)
        .uniques
        .keys()
        .flat_map(|set| set.iter().copied())
        .collect();
    let (mk, nmk): (Vec<ColumnId>, Vec<ColumnId>) = input
        .iter()
        .copied()
        .filter(|c| !model.column(*c).is_system())
        .partition(|c| keyed.contains(c));
    (mk, nmk)
}

/// Plan an entity upsert of `batch` into the single table named by `path`
///
/// Rows whose key columns match a stored row update it; other rows are
/// inserted. The options can skip or reject either kind of row.
pub fn plan_upsert(
    access: &AccessContext<'_>,
    path: &EntityPath,
    batch: &Batch,
    opts: UpsertOptions,
) -> ErmResult<WritePlan> {
    let model = access.model();
    let table = writable_table(access, path)?;
    let input = batch.resolve_columns(model, table)?;
    let (keys, values) = split_columns(model, table, &input);
    if keys.is_empty() {
        return Err(ErmError::BadData(
            "entity upsert requires at least one client-managed key for input correlation".to_string(),
        ));
    }
    let corr = Correlation {
        access,
        table,
        keys,
        values,
    };
    let will_update = opts.allow_existing == Flag::True && !corr.values.is_empty();
    let will_insert = opts.allow_missing == Flag::True;

    let mut plan = WritePlan::new(table);
    for stmt in batch.stage(model, table, INPUT_TABLE)? {
        plan.push(stmt);
    }
    plan.push(corr.unique_index());
    if opts.allow_existing == Flag::False {
        plan.push(corr.guard(
            Scope::Matched,
            &[],
            ErmError::ConflictData("input row exists while allow_existing is false".to_string()),
        ));
    }
    if opts.allow_missing == Flag::False {
        plan.push(corr.guard(
            Scope::Missing,
            &[],
            ErmError::ConflictData("input row does not match existing entity".to_string()),
        ));
    }
    if will_update {
        for stmt in corr.update_guards()? {
            plan.push(stmt);
        }
    }
    if will_insert {
        for stmt in corr.insert_guards()? {
            plan.push(stmt);
        }
    }
    if will_update {
        plan.push(Statement::Returning(corr.update_sql()));
    }
    if will_insert {
        plan.push(Statement::Returning(corr.insert_sql()));
    }
    plan.push(drop_table(INPUT_TABLE));
    tracing::debug!(
        table = %model.table_display(table),
        rows = batch.len(),
        statements = plan.statements.len(),
        "planned upsert"
    );
    Ok(plan)
}

/// Plan an update of `targets` on stored rows correlated by `keys`
///
/// Every input row must match a stored row.
pub fn plan_attribute_update(
    access: &AccessContext<'_>,
    path: &EntityPath,
    batch: &Batch,
    keys: &[String],
    targets: &[String],
) -> ErmResult<WritePlan> {
    let model = access.model();
    let table = writable_table(access, path)?;
    if keys.is_empty() || targets.is_empty() {
        return Err(ErmError::BadSyntax(
            "attribute update requires key and target column lists".to_string(),
        ));
    }
    let lookup = |name: &String| -> ErmResult<ColumnId> {
        if !batch.columns.contains(name) {
            return Err(ErmError::BadData(format!("input lacks column \"{}\"", name)));
        }
        model.table(table).column_id(name).ok_or_else(|| {
            ErmError::ConflictModel(format!(
                "column \"{}\" not in table {}",
                name,
                model.table_display(table)
            ))
        })
    };
    let key_cols = keys.iter().map(lookup).collect::<ErmResult<Vec<_>>>()?;
    let target_cols = targets.iter().map(lookup).collect::<ErmResult<Vec<_>>>()?;
    if let Some(c) = target_cols.iter().find(|c| key_cols.contains(c)) {
        return Err(ErmError::BadSyntax(format!(
            "column \"{}\" named as both key and target",
            model.column(*c).name
        )));
    }
    let corr = Correlation {
        access,
        table,
        keys: key_cols,
        values: target_cols,
    };

    let mut plan = WritePlan::new(table);
    for stmt in batch.stage(model, table, INPUT_TABLE)? {
        plan.push(stmt);
    }
    let mut unique = corr.unique_index();
    if let Statement::Unique { on_violation, .. } = &mut unique {
        *on_violation = ErmError::ConflictData("multiple input rows share the same key information".to_string());
    }
    plan.push(unique);
    plan.push(corr.guard(
        Scope::Missing,
        &[],
        ErmError::ConflictData("input row key does not match existing entity".to_string()),
    ));
    for stmt in corr.update_guards()? {
        plan.push(stmt);
    }
    plan.push(Statement::Returning(corr.update_sql()));
    plan.push(drop_table(INPUT_TABLE));
    tracing::debug!(
        table = %model.table_display(table),
        rows = batch.len(),
        "planned attribute update"
    );
    Ok(plan)
}
