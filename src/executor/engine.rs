//! Statement execution
//!
//! Reads run in a repeatable-read transaction that stays open until the
//! cursor is drained. Writes run a whole plan in one serializable
//! transaction and notify change sinks after commit.

use super::backend::{IsolationLevel, RowCursor};
use super::error::BackendError;
use super::pool::{Lease, Pool};
use super::row::Row;
use crate::catalog::Model;
use crate::compiler::{CompiledQuery, OutputColumn};
use crate::error::ErmResult;
use crate::write::{notify_changed, ChangeSink, Statement, WritePlan};

/// Rows of a running read
///
/// Owns its lease. Draining the cursor commits the read transaction and
/// frees the session for reuse; dropping it early discards the session.
pub struct ReadCursor {
    lease: Lease,
    rows: Box<dyn RowCursor>,
    columns: Vec<OutputColumn>,
    finished: bool,
}

impl ReadCursor {
    pub fn columns(&self) -> &[OutputColumn] {
        &self.columns
    }

    pub async fn next(&mut self) -> ErmResult<Option<Row>> {
        if self.finished {
            return Ok(None);
        }
        match self.rows.next().await {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.finished = true;
                self.rows.close().await?;
                self.lease.session()?.commit().await?;
                self.lease.set_reusable(true);
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                Err(e.into())
            }
        }
    }

    /// Drain every remaining row
    pub async fn collect(mut self) -> ErmResult<Vec<Row>> {
        let mut out = Vec::new();
        while let Some(row) = self.next().await? {
            out.push(row);
        }
        Ok(out)
    }
}

/// Run a compiled read
pub async fn run_read(pool: &Pool, query: &CompiledQuery) -> ErmResult<ReadCursor> {
    let mut lease = pool.acquire().await?;
    lease.set_reusable(false);
    let session = lease.session()?;
    session.begin(IsolationLevel::RepeatableRead).await?;
    let rows = session.query(&query.sql).await?;
    tracing::debug!(columns = query.columns.len(), "read started");
    Ok(ReadCursor {
        lease,
        rows,
        columns: query.columns.clone(),
        finished: false,
    })
}

/// Result of a committed write
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    /// Rows returned by the plan's mutations, in plan order
    pub rows: Vec<Row>,
    /// Data version the commit produced
    pub version: u64,
}

/// Run a write plan and notify `sink` of the changed tables
pub async fn run_write(
    pool: &Pool,
    model: &Model,
    plan: &WritePlan,
    sink: &dyn ChangeSink,
) -> ErmResult<WriteOutcome> {
    let mut lease = pool.acquire().await?;
    lease.set_reusable(false);
    let session = lease.session()?;
    session.begin(IsolationLevel::Serializable).await?;
    let rows = match apply(&mut lease, plan).await {
        Ok(rows) => rows,
        Err(e) => {
            match lease.session()?.rollback().await {
                Ok(()) => lease.set_reusable(true),
                Err(re) => tracing::warn!(error = %re, "rollback failed"),
            }
            tracing::debug!(error = %e, "write aborted");
            return Err(e);
        }
    };
    let version = lease.session()?.commit().await?;
    lease.set_reusable(true);
    drop(lease);
    tracing::debug!(
        table = %model.table_display(plan.table),
        rows = rows.len(),
        version,
        "write committed"
    );
    notify_changed(model, plan.table, version, sink);
    Ok(WriteOutcome { rows, version })
}

async fn apply(lease: &mut Lease, plan: &WritePlan) -> ErmResult<Vec<Row>> {
    let session = lease.session()?;
    let mut out = Vec::new();
    for stmt in &plan.statements {
        tracing::trace!(kind = stmt.kind(), sql = stmt.sql(), "write statement");
        match stmt {
            Statement::Exec(sql) => {
                session.execute(sql).await?;
            }
            Statement::Unique { sql, on_violation } => match session.execute(sql).await {
                Ok(_) => {}
                Err(BackendError::UniqueViolation(_)) => return Err(on_violation.clone()),
                Err(e) => return Err(e.into()),
            },
            Statement::Guard { sql, on_rows } => {
                let mut cursor = session.query(sql).await?;
                let hit = cursor.next().await?;
                cursor.close().await?;
                if hit.is_some() {
                    return Err(on_rows.clone());
                }
            }
            Statement::ExpectRows { sql, on_empty } => {
                let mut cursor = session.query(sql).await?;
                let count = cursor
                    .next()
                    .await?
                    .and_then(|row| row.get(0).and_then(|d| d.as_int()))
                    .unwrap_or(0);
                cursor.close().await?;
                if count == 0 {
                    return Err(on_empty.clone());
                }
            }
            Statement::Returning(sql) => {
                let mut cursor = session.query(sql).await?;
                while let Some(row) = cursor.next().await? {
                    out.push(row);
                }
                cursor.close().await?;
            }
        }
    }
    Ok(out)
}
