//! Query execution against a database backend
//!
//! The backend is a trait so the crate carries no database driver. Plans
//! and compiled queries are run over pooled sessions.

pub mod backend;
pub mod datum;
pub mod engine;
pub mod error;
pub mod pool;
pub mod row;
pub mod scripted;

pub use backend::{Backend, IsolationLevel, RowCursor, VecCursor};
pub use datum::Datum;
pub use engine::{run_read, run_write, ReadCursor, WriteOutcome};
pub use error::{BackendError, BackendResult};
pub use pool::{Connector, Lease, Pool};
pub use row::Row;
pub use scripted::{Reply, ScriptedBackend};
