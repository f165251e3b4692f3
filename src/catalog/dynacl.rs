//! Dynamic ACL bindings
//!
//! A binding grants rights per row: the row qualifies when a projection
//! path starting at the row reaches a column value that matches the client
//! (`acl` projection type) or is simply non-null (`nonnull`).
//!
//! Binding documents look like:
//!
//! ```text
//! {
//!   "types": ["select", "update"],
//!   "projection": [{"outbound": ["S", "T_owner_fkey"]}, {"filter": "active", "operand": "true"}, "members"],
//!   "projection_type": "acl",
//!   "scope_acl": ["*"]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::acl::Right;
use super::model::{ConstraintName, KeyRefId, Model, TableId};
use crate::error::{ErmError, ErmResult};
use crate::path::ast::{FilterExpr, Name, Operand, Operator};

/// How the projected value is tested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionType {
    /// Value (or array element) must equal a client attribute or `*`
    Acl,
    /// Value must be non-null
    NonNull,
}

/// One step of a binding projection path
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionStep {
    /// Traverse a key reference from the current table
    Join {
        keyref: KeyRefId,
        /// True when traversing from the referenced table to the referencing one
        inbound: bool,
        alias: Option<String>,
        context: Option<String>,
    },
    /// Restrict rows of the current (or aliased) table
    Filter(FilterExpr),
}

/// Resolved projection: steps, then the final column of the last table
#[derive(Debug, Clone, PartialEq)]
pub struct AclProjection {
    pub steps: Vec<ProjectionStep>,
    pub column: String,
}

impl AclProjection {
    /// Whether the projection reads the base row directly without joins
    pub fn is_local(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s, ProjectionStep::Filter(_)))
    }
}

/// A named dynamic ACL binding
#[derive(Debug, Clone, PartialEq)]
pub struct AclBinding {
    pub name: String,
    pub types: BTreeSet<Right>,
    pub projection: AclProjection,
    pub projection_type: ProjectionType,
    pub scope_acl: BTreeSet<String>,
}

/// Bindings by name; `None` suppresses an inherited binding of that name
pub type Dynacls = BTreeMap<String, Option<AclBinding>>;

/// Binding types accepted on tables and columns
pub const TABLE_DYNACL_TYPES: &[Right] = &[Right::Owner, Right::Update, Right::Delete, Right::Select];

/// Binding types accepted on key references
pub const KEYREF_DYNACL_TYPES: &[Right] = &[Right::Owner, Right::Insert, Right::Update];

impl AclBinding {
    /// Whether this binding applies to `access` for a client with `roles`
    pub fn inscope(&self, access: Right, roles: &BTreeSet<String>) -> bool {
        if self.scope_acl.is_disjoint(roles) {
            return false;
        }
        self.types.iter().any(|t| access.covered_by(*t))
    }

    /// Parse and validate a binding document against the model
    ///
    /// `base` is the table the projection starts from. Returns `None` for a
    /// `false` suppression entry.
    pub fn from_json(
        model: &Model,
        base: TableId,
        supported: &[Right],
        name: &str,
        doc: &Value,
    ) -> ErmResult<Option<AclBinding>> {
        if doc == &Value::Bool(false) {
            return Ok(None);
        }
        let obj = doc.as_object().ok_or_else(|| {
            ErmError::BadData(format!("ACL binding {} must be an object or false", name))
        })?;
        for key in obj.keys() {
            if !matches!(
                key.as_str(),
                "types" | "projection" | "projection_type" | "scope_acl" | "comment"
            ) {
                return Err(ErmError::BadData(format!(
                    "field \"{}\" not supported in ACL binding {}",
                    key, name
                )));
            }
        }

        let types = obj
            .get("types")
            .and_then(Value::as_array)
            .ok_or_else(|| ErmError::BadData(format!("field \"types\" is required for ACL binding {}", name)))?
            .iter()
            .map(|t| {
                t.as_str()
                    .and_then(Right::parse)
                    .filter(|r| supported.contains(r))
                    .ok_or_else(|| {
                        ErmError::BadData(format!("ACL binding {} type {} not supported", name, t))
                    })
            })
            .collect::<ErmResult<BTreeSet<_>>>()?;
        if types.is_empty() {
            return Err(ErmError::BadData(format!(
                "ACL binding {} must list at least one type",
                name
            )));
        }

        let scope_acl = match obj.get("scope_acl") {
            None => BTreeSet::from(["*".to_string()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|m| {
                    m.as_str().map(str::to_string).ok_or_else(|| {
                        ErmError::BadData(format!("scope_acl member {} in ACL binding {} must be a string", m, name))
                    })
                })
                .collect::<ErmResult<BTreeSet<_>>>()?,
            Some(other) => {
                return Err(ErmError::BadData(format!(
                    "scope_acl {} in ACL binding {} must be a list",
                    other, name
                )))
            }
        };

        let proj_doc = obj
            .get("projection")
            .ok_or_else(|| ErmError::BadData(format!("field \"projection\" is required for ACL binding {}", name)))?;
        let (projection, final_table) = compile_projection(model, base, name, proj_doc)?;

        let column = model.column_by_name(final_table, &projection.column)?;
        let is_text = column.ctype.scalar_name() == "text";
        let projection_type = match obj.get("projection_type").map(|v| v.as_str()) {
            None => {
                if is_text {
                    ProjectionType::Acl
                } else {
                    ProjectionType::NonNull
                }
            }
            Some(Some("acl")) => {
                if !is_text {
                    return Err(ErmError::ConflictModel(format!(
                        "ACL binding projection type \"acl\" not allowed for column {} in ACL binding {}",
                        column.name, name
                    )));
                }
                ProjectionType::Acl
            }
            Some(Some("nonnull")) => ProjectionType::NonNull,
            Some(_) => {
                return Err(ErmError::BadData(format!(
                    "invalid projection_type in ACL binding {}",
                    name
                )))
            }
        };

        Ok(Some(AclBinding {
            name: name.to_string(),
            types,
            projection,
            projection_type,
            scope_acl,
        }))
    }
}

fn compile_projection(
    model: &Model,
    base: TableId,
    binding: &str,
    doc: &Value,
) -> ErmResult<(AclProjection, TableId)> {
    let elems: Vec<Value> = match doc {
        Value::String(_) => vec![doc.clone()],
        Value::Array(items) if !items.is_empty() => items.clone(),
        _ => {
            return Err(ErmError::BadData(format!(
                "projection of ACL binding {} must be a column name or non-empty list",
                binding
            )))
        }
    };

    let mut aliases: BTreeMap<String, TableId> = BTreeMap::new();
    let mut current = base;
    let mut steps = Vec::new();

    let (last, path) = elems.split_last().ok_or_else(|| {
        ErmError::BadData(format!("projection of ACL binding {} is empty", binding))
    })?;

    for elem in path {
        let obj = elem.as_object().ok_or_else(|| {
            ErmError::BadData(format!(
                "projection element {} of ACL binding {} must be an object",
                elem, binding
            ))
        })?;
        if obj.contains_key("inbound") || obj.contains_key("outbound") {
            let context = optional_string(obj.get("context"), "context", binding)?;
            if let Some(ctx) = &context {
                current = *aliases.get(ctx).ok_or_else(|| {
                    ErmError::ConflictModel(format!("context alias {} not bound in ACL binding {}", ctx, binding))
                })?;
            }
            let alias = optional_string(obj.get("alias"), "alias", binding)?;
            let inbound = obj.contains_key("inbound");
            let fkname = obj
                .get(if inbound { "inbound" } else { "outbound" })
                .and_then(Value::as_array)
                .filter(|a| a.len() == 2 && a.iter().all(Value::is_string))
                .map(|a| ConstraintName::new(a[0].as_str().unwrap_or(""), a[1].as_str().unwrap_or("")))
                .ok_or_else(|| {
                    ErmError::BadData(format!("foreign key name in ACL binding {} not valid", binding))
                })?;
            let table = model.table(current);
            let candidates = if inbound { &table.inbound } else { &table.outbound };
            let keyref = candidates
                .iter()
                .copied()
                .find(|k| model.keyref(*k).has_constraint(&fkname))
                .ok_or_else(|| {
                    ErmError::ConflictModel(format!(
                        "no foreign key {} found connected to table {} in ACL binding {}",
                        fkname,
                        model.table_display(current),
                        binding
                    ))
                })?;
            current = if inbound {
                model.keyref_from_table(keyref)
            } else {
                model.keyref_to_table(keyref)
            };
            if let Some(a) = &alias {
                if aliases.insert(a.clone(), current).is_some() {
                    return Err(ErmError::BadData(format!(
                        "alias {} bound more than once in ACL binding {}",
                        a, binding
                    )));
                }
            }
            steps.push(ProjectionStep::Join {
                keyref,
                inbound,
                alias,
                context,
            });
        } else {
            let filter = compile_filter(model, current, &aliases, binding, elem)?;
            steps.push(ProjectionStep::Filter(filter));
        }
    }

    let column = last.as_str().ok_or_else(|| {
        ErmError::BadData(format!(
            "projection for ACL binding {} must conclude with a column name",
            binding
        ))
    })?;
    model.column_by_name(current, column)?;

    Ok((
        AclProjection {
            steps,
            column: column.to_string(),
        },
        current,
    ))
}

fn optional_string(v: Option<&Value>, what: &str, binding: &str) -> ErmResult<Option<String>> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ErmError::BadData(format!(
            "{} {} in ACL binding {} must be a string",
            what, other, binding
        ))),
    }
}

fn compile_filter(
    model: &Model,
    current: TableId,
    aliases: &BTreeMap<String, TableId>,
    binding: &str,
    elem: &Value,
) -> ErmResult<FilterExpr> {
    let malformed = || ErmError::BadData(format!("filter element {} of ACL binding {} is malformed", elem, binding));
    let obj = elem.as_object().ok_or_else(malformed)?;

    let filter = if let Some(Value::Array(items)) = obj.get("and") {
        FilterExpr::And(
            items
                .iter()
                .map(|e| compile_filter(model, current, aliases, binding, e))
                .collect::<ErmResult<_>>()?,
        )
    } else if let Some(Value::Array(items)) = obj.get("or") {
        FilterExpr::Or(
            items
                .iter()
                .map(|e| compile_filter(model, current, aliases, binding, e))
                .collect::<ErmResult<_>>()?,
        )
    } else if let Some(lname) = obj.get("filter") {
        let parts: Vec<Option<String>> = match lname {
            Value::String(s) => vec![Some(s.clone())],
            Value::Array(items) => items.iter().map(|v| v.as_str().map(str::to_string)).collect(),
            _ => return Err(malformed()),
        };
        let parts: Vec<Option<String>> = match parts.as_slice() {
            [None, rest @ ..] => rest.to_vec(),
            _ => parts,
        };
        let name = match parts.as_slice() {
            [Some(col)] => {
                model.column_by_name(current, col)?;
                Name::simple(col.clone())
            }
            [Some(alias), Some(col)] => {
                let t = aliases.get(alias).ok_or_else(|| {
                    ErmError::ConflictModel(format!("alias {} not bound in ACL binding {}", alias, binding))
                })?;
                model.column_by_name(*t, col)?;
                Name::new([alias.clone(), col.clone()])
            }
            _ => {
                return Err(ErmError::BadData(format!(
                    "invalid filter column name {} in ACL binding {}",
                    lname, binding
                )))
            }
        };
        let op_text = obj.get("operator").and_then(Value::as_str).unwrap_or("=");
        let op = Operator::parse(op_text).ok_or_else(|| {
            ErmError::BadData(format!("unknown operator {} in ACL binding {}", op_text, binding))
        })?;
        let operand = if op == Operator::Null {
            Operand::None
        } else {
            Operand::Value(match obj.get("operand") {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
        };
        FilterExpr::Compare { name, op, operand }
    } else {
        return Err(malformed());
    };

    if obj.get("negate").and_then(Value::as_bool).unwrap_or(false) {
        Ok(filter.negate())
    } else {
        Ok(filter)
    }
}
