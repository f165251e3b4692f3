//! ermpath - query-processing core of a relational data-access service
//!
//! - Catalog model with static and dynamic rights resolution
//! - Name and path resolution over the model
//! - Authorization-aware SQL compilation of reads
//! - Write planning for upsert, update and delete
//! - Pooled execution over a pluggable backend

pub mod catalog;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod path;
pub mod sql;
pub mod write;

pub use error::{ErmError, ErmResult};
