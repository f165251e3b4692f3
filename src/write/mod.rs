//! Write planning
//!
//! Writes are compiled into a [`WritePlan`]: an ordered list of statements
//! the executor runs inside one serializable transaction. Input is staged
//! into a temporary relation first; guard statements then check keys and
//! rights against the staged rows before anything is mutated.

pub mod delete;
pub mod input;
pub mod notify;
pub mod upsert;

use serde::Deserialize;

use crate::catalog::{AccessContext, ColumnId, Model, TableId};
use crate::error::{ErmError, ErmResult};
use crate::path::EntityPath;
use crate::sql::quote_ident;

pub use delete::{plan_attribute_delete, plan_entity_delete};
pub use input::{Batch, InputFormat, Record};
pub use notify::{affected_tables, notify_changed, ChangeRecorder, ChangeSink};
pub use upsert::{plan_attribute_update, plan_upsert, split_columns, UpsertOptions};

/// Name of the staged input relation
pub const INPUT_TABLE: &str = "_ermpath_input";
/// Name of the staged delete victims relation
pub const VICTIMS_TABLE: &str = "_ermpath_victims";

/// Behavior for input rows that match (or miss) an existing row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    /// Update or insert
    #[default]
    True,
    /// Leave the row alone
    Skip,
    /// Reject the request
    False,
}

/// One step of a write plan
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Run for effect
    Exec(String),
    /// Run for effect; a unique violation raises `on_violation`
    Unique { sql: String, on_violation: ErmError },
    /// Fail with `on_rows` if the query returns any row
    Guard { sql: String, on_rows: ErmError },
    /// Fail with `on_empty` if the single count it returns is zero
    ExpectRows { sql: String, on_empty: ErmError },
    /// Mutation whose returned rows are reported to the caller
    Returning(String),
}

impl Statement {
    pub fn sql(&self) -> &str {
        match self {
            Statement::Exec(sql) | Statement::Returning(sql) => sql,
            Statement::Unique { sql, .. }
            | Statement::Guard { sql, .. }
            | Statement::ExpectRows { sql, .. } => sql,
        }
    }

    /// Short tag used in plan listings
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Exec(_) => "exec",
            Statement::Unique { .. } => "unique",
            Statement::Guard { .. } => "guard",
            Statement::ExpectRows { .. } => "expect",
            Statement::Returning(_) => "returning",
        }
    }
}

/// Ordered statements for one write
#[derive(Debug, Clone, PartialEq)]
pub struct WritePlan {
    /// Table whose rows change
    pub table: TableId,
    pub statements: Vec<Statement>,
}

impl WritePlan {
    pub fn new(table: TableId) -> Self {
        WritePlan {
            table,
            statements: Vec::new(),
        }
    }

    pub fn push(&mut self, stmt: Statement) {
        self.statements.push(stmt);
    }

    /// Guards in plan order
    pub fn guards(&self) -> impl Iterator<Item = &Statement> {
        self.statements
            .iter()
            .filter(|s| matches!(s, Statement::Guard { .. }))
    }

    /// Position of the first statement that changes the target table
    pub fn first_mutation(&self) -> Option<usize> {
        self.statements
            .iter()
            .position(|s| matches!(s, Statement::Returning(_)))
    }
}

/// Single writable table named by a path
pub(crate) fn writable_table(access: &AccessContext<'_>, path: &EntityPath) -> ErmResult<TableId> {
    if path.len() != 1 {
        return Err(ErmError::BadSyntax(
            "write path must name exactly one table".to_string(),
        ));
    }
    let elem = path.element(0);
    if !elem.filters.is_empty() {
        return Err(ErmError::BadSyntax("entity filters not allowed".to_string()));
    }
    target_table(access.model(), elem.table)
}

/// Check that a table accepts row changes
pub(crate) fn target_table(model: &Model, table: TableId) -> ErmResult<TableId> {
    if !model.table(table).is_writable() {
        return Err(ErmError::ConflictModel(format!(
            "Entity {} is not writable",
            model.table_display(table)
        )));
    }
    Ok(table)
}

/// `(t."c" = i."c")`, NULL-matching for nullable columns, AND'd over `cols`
pub(crate) fn keymatch(model: &Model, cols: &[ColumnId], t: &str, i: &str) -> String {
    cols.iter()
        .map(|c| {
            let col = model.column(*c);
            let name = col.sql_name();
            if col.nullok {
                format!(
                    "({t}.{n} = {i}.{n} OR ({t}.{n} IS NULL AND {i}.{n} IS NULL))",
                    t = t,
                    i = i,
                    n = name
                )
            } else {
                format!("({}.{} = {}.{})", t, name, i, name)
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Quoted, comma-separated column names with an optional alias prefix
pub(crate) fn column_list(model: &Model, cols: &[ColumnId], prefix: Option<&str>) -> String {
    cols.iter()
        .map(|c| match prefix {
            Some(p) => format!("{}.{}", p, model.column(*c).sql_name()),
            None => model.column(*c).sql_name(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn drop_table(name: &str) -> Statement {
    Statement::Exec(format!("DROP TABLE {}", quote_ident(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_deserialize() {
        let f: Flag = serde_json::from_str("\"skip\"").unwrap();
        assert_eq!(f, Flag::Skip);
        assert_eq!(Flag::default(), Flag::True);
    }

    #[test]
    fn test_plan_positions() {
        let mut plan = WritePlan::new(TableId(0));
        plan.push(Statement::Exec("CREATE".into()));
        plan.push(Statement::Guard {
            sql: "SELECT 1".into(),
            on_rows: ErmError::Forbidden("x".into()),
        });
        plan.push(Statement::Returning("UPDATE".into()));
        assert_eq!(plan.guards().count(), 1);
        assert_eq!(plan.first_mutation(), Some(2));
        assert_eq!(plan.statements[1].kind(), "guard");
        assert_eq!(plan.statements[2].sql(), "UPDATE");
    }
}
