//! System columns, private schemas and identifier limits
//!
//! Every managed table carries five system columns maintained by the
//! backend. They are readable like any other column but excluded from the
//! meta-key used for write correlation, and some are never client-writable.

use crate::error::{ErmError, ErmResult};

/// Row identifier
pub const RID: &str = "RID";
/// Row creation time
pub const RCT: &str = "RCT";
/// Row modification time
pub const RMT: &str = "RMT";
/// Row created by
pub const RCB: &str = "RCB";
/// Row modified by
pub const RMB: &str = "RMB";

/// All system column names in canonical order
pub const SYSTEM_COLUMNS: &[&str] = &[RID, RCT, RMT, RCB, RMB];

/// Schemas introspected but never exposed to path resolution
pub const PRIVATE_SCHEMAS: &[&str] = &["pg_catalog", "information_schema", "_ermrest", "_ermrest_history"];

/// Identifier length limit in bytes
pub const MAX_IDENTIFIER_BYTES: usize = 63;

/// Check if a schema name is private
pub fn is_private_schema(name: &str) -> bool {
    PRIVATE_SCHEMAS.contains(&name)
}

/// Type names of the system columns, in [`SYSTEM_COLUMNS`] order
pub fn system_column_types() -> [(&'static str, &'static str, bool); 5] {
    [
        (RID, "text", false),
        (RCT, "timestamptz", false),
        (RMT, "timestamptz", false),
        (RCB, "text", true),
        (RMB, "text", true),
    ]
}

/// Reject empty or over-long identifiers
pub fn enforce_identifier(name: &str) -> ErmResult<()> {
    if name.is_empty() {
        return Err(ErmError::BadData("empty identifier not allowed".to_string()));
    }
    if name.len() > MAX_IDENTIFIER_BYTES {
        return Err(ErmError::BadData(format!(
            "identifier \"{}\" exceeds {} byte limit",
            name, MAX_IDENTIFIER_BYTES
        )));
    }
    Ok(())
}
