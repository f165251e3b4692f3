//! Scripted in-memory backend
//!
//! Answers statements from a list of rules matched by substring, and
//! records every statement it sees. Clones share one script, so a test
//! can keep a handle while the pool owns the sessions.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::backend::{Backend, IsolationLevel, RowCursor, VecCursor};
use super::error::{BackendError, BackendResult};
use super::pool::Connector;
use super::row::Row;

/// Canned reply to a matching statement
#[derive(Debug, Clone)]
pub enum Reply {
    Rows(Vec<Row>),
    Count(u64),
    Fail(BackendError),
}

#[derive(Debug, Default)]
struct Script {
    rules: Vec<(String, Reply)>,
    log: Vec<String>,
    version: u64,
    connects: usize,
}

/// Backend whose replies are scripted by the test
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `reply` to statements containing `pattern`
    ///
    /// Earlier rules win.
    pub fn on(self, pattern: impl Into<String>, reply: Reply) -> Self {
        self.script.lock().rules.push((pattern.into(), reply));
        self
    }

    /// Statements seen so far, with transaction control as `BEGIN ...`,
    /// `COMMIT` and `ROLLBACK`
    pub fn log(&self) -> Vec<String> {
        self.script.lock().log.clone()
    }

    /// Sessions opened through the connector
    pub fn connects(&self) -> usize {
        self.script.lock().connects
    }

    fn reply(&self, sql: &str) -> Option<Reply> {
        let mut script = self.script.lock();
        script.log.push(sql.to_string());
        script
            .rules
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone())
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn begin(&mut self, isolation: IsolationLevel) -> BackendResult<()> {
        let sql = format!("BEGIN ISOLATION LEVEL {}", isolation.to_sql());
        match self.reply(&sql) {
            Some(Reply::Fail(e)) => Err(e),
            _ => Ok(()),
        }
    }

    async fn execute(&mut self, sql: &str) -> BackendResult<u64> {
        match self.reply(sql) {
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Count(n)) => Ok(n),
            Some(Reply::Rows(rows)) => Ok(rows.len() as u64),
            None => Ok(0),
        }
    }

    async fn query(&mut self, sql: &str) -> BackendResult<Box<dyn RowCursor>> {
        match self.reply(sql) {
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Rows(rows)) => Ok(Box::new(VecCursor::new(rows))),
            Some(Reply::Count(_)) | None => Ok(Box::new(VecCursor::default())),
        }
    }

    async fn commit(&mut self) -> BackendResult<u64> {
        if let Some(Reply::Fail(e)) = self.reply("COMMIT") {
            return Err(e);
        }
        let mut script = self.script.lock();
        script.version += 1;
        Ok(script.version)
    }

    async fn rollback(&mut self) -> BackendResult<()> {
        match self.reply("ROLLBACK") {
            Some(Reply::Fail(e)) => Err(e),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Connector for ScriptedBackend {
    async fn connect(&self) -> BackendResult<Box<dyn Backend>> {
        self.script.lock().connects += 1;
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Datum;

    #[tokio::test]
    async fn test_rules_and_log() {
        let mut b = ScriptedBackend::new()
            .on("count(*)", Reply::Rows(vec![Row::new(vec![Datum::Int(3)])]))
            .on("DROP", Reply::Fail(BackendError::Other("no such table".into())));
        let mut cursor = b.query("SELECT count(*) FROM x").await.unwrap();
        assert_eq!(cursor.next().await.unwrap(), Some(Row::new(vec![Datum::Int(3)])));
        assert!(b.execute("DROP TABLE x").await.is_err());
        assert_eq!(b.commit().await.unwrap(), 1);
        assert_eq!(b.log(), vec!["SELECT count(*) FROM x", "DROP TABLE x", "COMMIT"]);
    }
}
