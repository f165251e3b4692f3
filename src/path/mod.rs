//! Resource paths
//!
//! [`ast`] holds the parsed input handed over by the request grammar. The
//! [`Resolver`] binds it to a model snapshot, producing an [`EntityPath`]:
//! an ordered list of table instances, each linked to an earlier element
//! and carrying the filters applied while it was the path context.

pub mod ast;
pub mod predicate;
pub mod resolver;

use std::collections::BTreeMap;

use crate::catalog::{ColumnId, KeyRefId, Model, TableId};
use ast::OuterJoin;

pub use predicate::{ColumnRef, ColumnTarget, Predicate};
pub use resolver::Resolver;

/// Traversal direction of a key reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    /// From the referencing table to the referenced table
    Outbound,
    /// From the referenced table to the referencing table
    Inbound,
}

impl Direction {
    /// REST link operator for the direction
    pub fn refop(&self) -> &'static str {
        match self {
            Direction::Outbound => "=@",
            Direction::Inbound => "@=",
        }
    }
}

/// One key reference traversed in a direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkEdge {
    pub keyref: KeyRefId,
    pub direction: Direction,
}

impl LinkEdge {
    /// (context-side column, new-side column) pairs
    pub fn column_pairs(&self, model: &Model) -> Vec<(ColumnId, ColumnId)> {
        let pairs = &model.keyref(self.keyref).pairs;
        match self.direction {
            Direction::Outbound => pairs.clone(),
            Direction::Inbound => pairs.iter().map(|(f, p)| (*p, *f)).collect(),
        }
    }

    /// Table reached by traversing the edge
    pub fn target_table(&self, model: &Model) -> TableId {
        match self.direction {
            Direction::Outbound => model.keyref_to_table(self.keyref),
            Direction::Inbound => model.keyref_from_table(self.keyref),
        }
    }

    /// Table the edge is traversed from
    pub fn source_table(&self, model: &Model) -> TableId {
        match self.direction {
            Direction::Outbound => model.keyref_from_table(self.keyref),
            Direction::Inbound => model.keyref_to_table(self.keyref),
        }
    }
}

/// How an element joins its context element
#[derive(Debug, Clone, PartialEq)]
pub enum Link {
    /// One key reference, or a disjunction of several between the same tables
    Edges(Vec<LinkEdge>),
    /// Column equality not backed by any constraint
    Explicit(Vec<(ColumnId, ColumnId)>),
}

impl Link {
    /// Column pairings, one list per disjunct
    pub fn disjuncts(&self, model: &Model) -> Vec<Vec<(ColumnId, ColumnId)>> {
        match self {
            Link::Edges(edges) => edges.iter().map(|e| e.column_pairs(model)).collect(),
            Link::Explicit(pairs) => vec![pairs.clone()],
        }
    }

    /// Key references used, for authorization checks
    pub fn keyrefs(&self) -> Vec<KeyRefId> {
        match self {
            Link::Edges(edges) => edges.iter().map(|e| e.keyref).collect(),
            Link::Explicit(_) => Vec::new(),
        }
    }
}

/// One table instance in a resolved path
#[derive(Debug, Clone, PartialEq)]
pub struct PathElement {
    pub pos: usize,
    pub table: TableId,
    pub alias: Option<String>,
    pub link: Option<Link>,
    /// Element the link attaches to
    pub context_pos: Option<usize>,
    pub outer: Option<OuterJoin>,
    pub filters: Vec<Predicate>,
}

impl PathElement {
    /// SQL alias used for this element, `t0..tn`
    pub fn sql_alias(&self) -> String {
        format!("t{}", self.pos)
    }
}

/// A resolved resource path
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityPath {
    pub(crate) elements: Vec<PathElement>,
    pub(crate) current: usize,
    pub(crate) aliases: BTreeMap<String, usize>,
}

impl EntityPath {
    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    pub fn element(&self, pos: usize) -> &PathElement {
        &self.elements[pos]
    }

    /// Position of the current context element
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn current_element(&self) -> Option<&PathElement> {
        self.elements.get(self.current)
    }

    /// Element bound to an alias
    pub fn alias(&self, name: &str) -> Option<usize> {
        self.aliases.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Whether any element carries filters
    pub fn has_filters(&self) -> bool {
        self.elements.iter().any(|e| !e.filters.is_empty())
    }
}
