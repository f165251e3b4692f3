//! Database backend seam
//!
//! A backend is one database session. Cursors pull rows one at a time
//! through the `RowCursor` iterator, in the open/next/close manner.

use std::collections::VecDeque;

use async_trait::async_trait;

use super::error::BackendResult;
use super::row::Row;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Each statement sees a fresh snapshot
    ReadCommitted,
    /// Snapshot taken at first read, consistent for the transaction
    #[default]
    RepeatableRead,
    /// Full serialization; conflicts abort with a serialization failure
    Serializable,
}

impl IsolationLevel {
    pub fn to_sql(&self) -> &'static str {
        match self {
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Pull-based result iterator
#[async_trait]
pub trait RowCursor: Send {
    /// Next row, or None if exhausted
    async fn next(&mut self) -> BackendResult<Option<Row>>;

    /// Release the statement
    async fn close(&mut self) -> BackendResult<()>;
}

/// One database session
#[async_trait]
pub trait Backend: Send {
    async fn begin(&mut self, isolation: IsolationLevel) -> BackendResult<()>;

    /// Run a statement for effect, returning the affected row count
    async fn execute(&mut self, sql: &str) -> BackendResult<u64>;

    /// Run a query and return a cursor over its rows
    async fn query(&mut self, sql: &str) -> BackendResult<Box<dyn RowCursor>>;

    /// Commit, returning the data version the transaction produced
    async fn commit(&mut self) -> BackendResult<u64>;

    async fn rollback(&mut self) -> BackendResult<()>;
}

/// Cursor over rows already in memory
#[derive(Debug, Default)]
pub struct VecCursor {
    rows: VecDeque<Row>,
}

impl VecCursor {
    pub fn new(rows: Vec<Row>) -> Self {
        VecCursor { rows: rows.into() }
    }
}

#[async_trait]
impl RowCursor for VecCursor {
    async fn next(&mut self) -> BackendResult<Option<Row>> {
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> BackendResult<()> {
        self.rows.clear();
        Ok(())
    }
}
