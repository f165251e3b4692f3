//! Resolved filter predicates

use crate::catalog::ColumnId;
use crate::path::ast::{Operand, Operator};

/// A column bound to one path element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRef {
    /// Position of the element in the path
    pub element: usize,
    pub column: ColumnId,
}

/// Result of resolving a column name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnTarget {
    Column(ColumnRef),
    /// The `*` free-text pseudo-column of an element
    FreeText(usize),
}

impl ColumnTarget {
    /// Element this target belongs to
    pub fn element(&self) -> usize {
        match self {
            ColumnTarget::Column(c) => c.element,
            ColumnTarget::FreeText(e) => *e,
        }
    }
}

/// Filter tree with names resolved to path columns
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        target: ColumnTarget,
        op: Operator,
        operand: Operand,
    },
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Every column the predicate reads, free-text excluded
    pub fn columns(&self) -> Vec<ColumnRef> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<ColumnRef>) {
        match self {
            Predicate::Compare {
                target: ColumnTarget::Column(c),
                ..
            } => out.push(*c),
            Predicate::Compare { .. } => {}
            Predicate::Not(p) => p.collect_columns(out),
            Predicate::And(ps) | Predicate::Or(ps) => {
                for p in ps {
                    p.collect_columns(out);
                }
            }
        }
    }
}
