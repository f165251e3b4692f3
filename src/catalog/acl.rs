//! Static access control lists and the rights lattice
//!
//! Rights are named access modes. A grant of a stronger right implies the
//! weaker ones according to a fixed lattice:
//! - `owner` implies everything
//! - `write` implies `insert`, `update`, `delete`
//! - `select` is implied by `update` and `delete`
//! - any right implies `enumerate`

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::Value;

use super::dynacl::Dynacls;
use super::model::{Model, ResourceId};
use crate::error::{ErmError, ErmResult};

/// Named access right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Right {
    Owner,
    Create,
    Write,
    Insert,
    Update,
    Delete,
    Select,
    Enumerate,
}

impl Right {
    /// Every right, strongest first
    pub const ALL: [Right; 8] = [
        Right::Owner,
        Right::Create,
        Right::Write,
        Right::Insert,
        Right::Update,
        Right::Delete,
        Right::Select,
        Right::Enumerate,
    ];

    /// Parse a right name (case-sensitive, as stored in ACL documents)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Right::Owner),
            "create" => Some(Right::Create),
            "write" => Some(Right::Write),
            "insert" => Some(Right::Insert),
            "update" => Some(Right::Update),
            "delete" => Some(Right::Delete),
            "select" => Some(Right::Select),
            "enumerate" => Some(Right::Enumerate),
            _ => None,
        }
    }

    /// Storage name
    pub fn to_str(&self) -> &'static str {
        match self {
            Right::Owner => "owner",
            Right::Create => "create",
            Right::Write => "write",
            Right::Insert => "insert",
            Right::Update => "update",
            Right::Delete => "delete",
            Right::Select => "select",
            Right::Enumerate => "enumerate",
        }
    }

    /// Rights whose grant is sufficient for this right
    pub fn sufficient(&self) -> &'static [Right] {
        match self {
            Right::Owner => &[],
            Right::Create => &[Right::Owner],
            Right::Write => &[Right::Owner],
            Right::Insert | Right::Update | Right::Delete => &[Right::Owner, Right::Write],
            Right::Select => &[Right::Owner, Right::Write, Right::Update, Right::Delete],
            Right::Enumerate => &[
                Right::Owner,
                Right::Create,
                Right::Write,
                Right::Insert,
                Right::Update,
                Right::Delete,
                Right::Select,
            ],
        }
    }

    /// Whether a grant of `other` covers this right
    pub fn covered_by(&self, other: Right) -> bool {
        *self == other || self.sufficient().contains(&other)
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

/// Static ACL: right name to member list
///
/// Presence of a key with an empty member list is meaningful. It blocks
/// inheritance of the parent's decision for that right.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    entries: BTreeMap<Right, BTreeSet<String>>,
}

impl Acl {
    /// Create an empty ACL
    pub fn new() -> Self {
        Acl::empty()
    }

    /// Empty ACL, usable in statics
    pub const fn empty() -> Self {
        Acl {
            entries: BTreeMap::new(),
        }
    }

    /// Builder: set members for a right
    #[must_use]
    pub fn grant<I, S>(mut self, right: Right, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(right, members);
        self
    }

    /// Replace members for a right
    pub fn set<I, S>(&mut self, right: Right, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries
            .insert(right, members.into_iter().map(Into::into).collect());
    }

    /// Whether this ACL defines an entry (possibly empty) for the right
    pub fn contains(&self, right: Right) -> bool {
        self.entries.contains_key(&right)
    }

    /// Members explicitly listed for the right
    pub fn members(&self, right: Right) -> Option<&BTreeSet<String>> {
        self.entries.get(&right)
    }

    /// Whether roles intersect the right's members or those of any sufficient right
    pub fn intersects(&self, right: Right, roles: &BTreeSet<String>) -> bool {
        std::iter::once(right)
            .chain(right.sufficient().iter().copied())
            .filter_map(|r| self.entries.get(&r))
            .any(|members| !members.is_disjoint(roles))
    }

    /// Parse an ACL document `{"select": ["*"], ...}`
    pub fn from_json(doc: &Value, supported: &[Right]) -> ErmResult<Self> {
        let obj = doc
            .as_object()
            .ok_or_else(|| ErmError::BadData(format!("ACL set {} must be an object", doc)))?;
        let mut acl = Acl::new();
        for (name, members) in obj {
            let right = Right::parse(name)
                .filter(|r| supported.contains(r))
                .ok_or_else(|| ErmError::BadData(format!("ACL name \"{}\" not supported", name)))?;
            let list = members
                .as_array()
                .ok_or_else(|| ErmError::BadData(format!("ACL {} must be a list", name)))?
                .iter()
                .map(|m| {
                    m.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| ErmError::BadData(format!("ACL member {} must be a string", m)))
                })
                .collect::<ErmResult<Vec<_>>>()?;
            acl.set(right, list);
        }
        Ok(acl)
    }

    /// Iterate entries in right order
    pub fn iter(&self) -> impl Iterator<Item = (&Right, &BTreeSet<String>)> {
        self.entries.iter()
    }
}

/// The requesting client
///
/// Roles are the client id, its attributes, and the wildcard `*`.
#[derive(Debug, Clone, Default)]
pub struct Client {
    id: Option<String>,
    attributes: Vec<String>,
}

impl Client {
    /// Anonymous client with only the `*` role
    pub fn anonymous() -> Self {
        Client::default()
    }

    /// Authenticated client
    pub fn new(id: impl Into<String>) -> Self {
        Client {
            id: Some(id.into()),
            attributes: Vec::new(),
        }
    }

    /// Builder: add a group or other attribute
    #[must_use]
    pub fn with_attribute(mut self, attr: impl Into<String>) -> Self {
        self.attributes.push(attr.into());
        self
    }

    /// Client id, if authenticated
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Whether the client is anonymous
    pub fn is_anonymous(&self) -> bool {
        self.id.is_none()
    }

    /// Role set used for ACL intersection
    pub fn roles(&self) -> BTreeSet<String> {
        let mut roles: BTreeSet<String> = self.attributes.iter().cloned().collect();
        if let Some(id) = &self.id {
            roles.insert(id.clone());
        }
        roles.insert("*".to_string());
        roles
    }

    /// Attribute list (including id and `*`) for ACL-typed dynamic projections
    pub fn attribute_list(&self) -> Vec<String> {
        self.roles().into_iter().collect()
    }
}

/// Resources carrying static ACLs
///
/// Rights resolution itself lives in [`super::AccessContext`]; this trait
/// supplies the per-kind data it needs.
pub trait Rightful {
    /// Handle of this resource
    fn resource_id(&self) -> ResourceId;

    /// Static ACL
    fn acls(&self) -> &Acl;

    /// Dynamic ACL bindings, for kinds that support them
    fn dynacls(&self) -> Option<&Dynacls> {
        None
    }

    /// Resource whose ACLs this one inherits
    fn acl_parent(&self, model: &Model) -> Option<ResourceId>;

    /// Whether anonymous clients may hold mutation rights
    fn anon_mutation_ok(&self) -> bool {
        false
    }

    /// Rights accepted in this resource's ACL
    fn supported_rights(&self) -> &'static [Right];

    /// Rights reported in a rights summary
    fn summary_rights(&self) -> &'static [Right];
}

/// Annotation map: key URI to JSON document
pub type Annotations = BTreeMap<String, Value>;

/// Resources carrying annotations
pub trait Annotatable {
    /// All annotations
    fn annotations(&self) -> &Annotations;

    /// One annotation, or NotFound
    fn annotation(&self, key: &str) -> ErmResult<&Value> {
        self.annotations()
            .get(key)
            .ok_or_else(|| ErmError::NotFound(format!("annotation \"{}\"", key)))
    }
}
