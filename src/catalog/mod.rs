//! Catalog - schemas, tables, columns, keys and the rights they carry
//!
//! A [`Model`] is one immutable snapshot of a catalog, built from
//! introspection rows and shared between requests through [`ModelCache`].
//! Per-request authorization decisions are made by an [`AccessContext`].

pub mod access;
pub mod acl;
pub mod cache;
pub mod dynacl;
pub mod introspect;
pub mod model;
pub mod system;
pub mod types;

pub use access::AccessContext;
pub use acl::{Acl, Annotatable, Annotations, Client, Right, Rightful};
pub use cache::ModelCache;
pub use dynacl::{AclBinding, AclProjection, ProjectionStep, ProjectionType};
pub use introspect::{ColumnRow, ForeignKeyRow, Introspection, KeyRow, SchemaRow, TableRow};
pub use model::{
    Column, ColumnId, ConstraintName, ForeignKey, ForeignKeyId, KeyRefId, KeyReference, Model,
    RefAction, ResourceId, Schema, SchemaId, Table, TableId, TableKind, Unique, UniqueId,
};
pub use types::Type;
