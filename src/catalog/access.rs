//! Rights resolution for one client against one model snapshot
//!
//! Decisions are tri-state: `Some(true)` granted, `Some(false)` denied,
//! `None` undetermined until row data is consulted through a dynamic ACL
//! binding. Results are memoized per (resource, right) for the lifetime of
//! the context, which normally spans a single request.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::Mutex;

use super::acl::{Client, Right};
use super::dynacl::{AclBinding, Dynacls};
use super::model::{ColumnId, KeyRefId, Model, ResourceId, TableId};
use super::system::{is_private_schema, RCB, RID, RMB, RMT};
use crate::error::{ErmError, ErmResult};

/// Per-request access context
pub struct AccessContext<'m> {
    model: &'m Model,
    client: Client,
    roles: BTreeSet<String>,
    memo: Mutex<HashMap<(ResourceId, Right), Option<bool>>>,
}

impl<'m> AccessContext<'m> {
    pub fn new(model: &'m Model, client: Client) -> Self {
        let roles = client.roles();
        AccessContext {
            model,
            client,
            roles,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn model(&self) -> &'m Model {
        self.model
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn is_anonymous(&self) -> bool {
        self.client.is_anonymous()
    }

    /// Tri-state decision for `right` on `res`
    pub fn has_right(&self, res: ResourceId, right: Right) -> Option<bool> {
        if let Some(decision) = self.memo.lock().get(&(res, right)) {
            return *decision;
        }
        let decision = self.decide(res, right);
        self.memo.lock().insert((res, right), decision);
        decision
    }

    /// Whether the resource is visible to the client
    pub fn enumerable(&self, res: ResourceId) -> bool {
        self.has_right(res, Right::Enumerate) == Some(true)
    }

    /// A multi-edge is visible only when every component is
    pub fn keyrefs_enumerable(&self, keyrefs: &[KeyRefId]) -> bool {
        !keyrefs.is_empty()
            && keyrefs
                .iter()
                .all(|k| self.enumerable(ResourceId::KeyRef(*k)))
    }

    /// Fail unless the right is granted or, without `require_true`, undetermined
    pub fn enforce_right(&self, res: ResourceId, right: Right, require_true: bool) -> ErmResult<()> {
        let decision = self.has_right(res, right);
        let denied = match decision {
            Some(false) => true,
            None => require_true,
            Some(true) => false,
        };
        if denied {
            let what = format!("{} access on {}", right, self.model.resource_display(res));
            tracing::debug!(
                client = self.client.id().unwrap_or("*"),
                right = %right,
                resource = %what,
                "access denied"
            );
            return Err(ErmError::denied(what, self.is_anonymous()));
        }
        Ok(())
    }

    /// Decision for every reportable right of a resource
    ///
    /// A table right denied statically is reported as undetermined when a
    /// column binding may still grant it on some rows.
    pub fn rights_summary(&self, res: ResourceId) -> BTreeMap<Right, Option<bool>> {
        let rightful = self.model.rightful(res);
        rightful
            .summary_rights()
            .iter()
            .map(|r| {
                let mut decision = self.has_right(res, *r);
                if let (ResourceId::Table(t), Some(false)) = (res, decision) {
                    let column_binding = self.model.columns_of(t).any(|c| {
                        c.dynacls
                            .values()
                            .flatten()
                            .any(|b| b.inscope(*r, &self.roles))
                    });
                    if column_binding {
                        decision = None;
                    }
                }
                (*r, decision)
            })
            .collect()
    }

    /// Bindings of a resource that apply to `right`, including inherited ones
    /// not overridden by name
    pub fn inscope_bindings(&self, res: ResourceId, right: Right) -> Vec<&'m AclBinding> {
        let mut out: Vec<&'m AclBinding> = Vec::new();
        let rightful = self.model.rightful(res);
        let own: Option<&'m Dynacls> = rightful.dynacls();
        if let Some(own) = own {
            out.extend(own.values().flatten().filter(|b| b.inscope(right, &self.roles)));
            if let Some(parent) = self.inherited_dynacls(res) {
                out.extend(
                    parent
                        .iter()
                        .filter(|(name, _)| !own.contains_key(*name))
                        .filter_map(|(_, b)| b.as_ref())
                        .filter(|b| b.inscope(right, &self.roles)),
                );
            }
        }
        out
    }

    /// Table by bare name, searched across enumerable schemas
    pub fn lookup_table(&self, name: &str) -> ErmResult<TableId> {
        let found: Vec<TableId> = self
            .model
            .schemas()
            .filter(|s| !is_private_schema(&s.name))
            .filter(|s| self.enumerable(ResourceId::Schema(s.id)))
            .filter_map(|s| s.tables.get(name).copied())
            .filter(|t| self.enumerable(ResourceId::Table(*t)))
            .collect();
        match found.as_slice() {
            [t] => Ok(*t),
            [] => Err(ErmError::ConflictModel(format!(
                "Table \"{}\" not found in any schema",
                name
            ))),
            _ => Err(ErmError::ConflictModel(format!(
                "Table name \"{}\" is ambiguous",
                name
            ))),
        }
    }

    fn inherited_dynacls(&self, res: ResourceId) -> Option<&'m Dynacls> {
        match res {
            ResourceId::Column(c) => Some(&self.model.table(self.model.column(c).table).dynacls),
            _ => None,
        }
    }

    fn decide(&self, res: ResourceId, right: Right) -> Option<bool> {
        let model = self.model;
        match res {
            ResourceId::Table(t) => {
                if !self.enumerable(ResourceId::Schema(model.table(t).schema)) {
                    return Some(false);
                }
            }
            ResourceId::Column(c) => {
                let col = model.column(c);
                let blocked = match col.name.as_str() {
                    RMT | RMB => matches!(right, Right::Insert | Right::Update | Right::Write),
                    RID | RCB => matches!(right, Right::Update | Right::Write),
                    _ => false,
                };
                if blocked || self.has_right(ResourceId::Table(col.table), right) == Some(false) {
                    return Some(false);
                }
            }
            ResourceId::Unique(u) if right == Right::Enumerate => {
                return Some(self.columns_visible(model.unique(u).columns.iter().copied()));
            }
            ResourceId::ForeignKey(f) if right == Right::Enumerate => {
                let fk = model.foreign_key(f);
                let visible = self.columns_visible(fk.columns.iter().copied())
                    && fk
                        .references
                        .values()
                        .flatten()
                        .any(|k| self.enumerable(ResourceId::KeyRef(*k)));
                return Some(visible);
            }
            ResourceId::KeyRef(k) => {
                let keyref = model.keyref(k);
                match right {
                    Right::Enumerate => {
                        let visible = self.enumerable(ResourceId::Unique(keyref.unique))
                            && self.columns_visible(keyref.pairs.iter().map(|(f, _)| *f));
                        if !visible {
                            return Some(false);
                        }
                    }
                    Right::Insert | Right::Update if !keyref.acls.contains(right) => {
                        return Some(true);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        self.decide_generic(res, right)
    }

    fn columns_visible(&self, cols: impl IntoIterator<Item = ColumnId>) -> bool {
        cols.into_iter().all(|c| {
            let res = ResourceId::Column(c);
            self.enumerable(res) && self.has_right(res, Right::Select) != Some(false)
        })
    }

    fn decide_generic(&self, res: ResourceId, right: Right) -> Option<bool> {
        let rightful = self.model.rightful(res);

        if self.is_anonymous()
            && !matches!(right, Right::Enumerate | Right::Select)
            && !rightful.anon_mutation_ok()
        {
            return Some(false);
        }

        if rightful.acls().intersects(right, &self.roles) {
            return Some(true);
        }
        if right
            .sufficient()
            .iter()
            .any(|r| self.has_right(res, *r) == Some(true))
        {
            return Some(true);
        }

        let mut parent_decision = Some(false);
        if let Some(parent) = rightful.acl_parent(self.model) {
            if self.has_right(parent, Right::Owner) == Some(true) {
                return Some(true);
            }
            if !rightful.acls().contains(right) {
                parent_decision = self.has_right(parent, right);
                if parent_decision == Some(true) {
                    return Some(true);
                }
            }
        }

        if rightful.dynacls().is_some() {
            if !self.inscope_bindings(res, right).is_empty() {
                return None;
            }
        } else if parent_decision.is_none() {
            return None;
        }
        Some(false)
    }
}
