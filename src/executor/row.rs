//! Row type - a collection of datums

use serde_json::{Map, Value};

use super::datum::Datum;
use crate::compiler::OutputColumn;

/// A row of datums
#[derive(Debug, Clone, Default)]
pub struct Row {
    values: Vec<Datum>,
}

impl Row {
    pub fn new(values: Vec<Datum>) -> Self {
        Row { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Datum by index, None if out of bounds
    pub fn get(&self, index: usize) -> Option<&Datum> {
        self.values.get(index)
    }

    pub fn values(&self) -> &[Datum] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Datum> {
        self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = &Datum> {
        self.values.iter()
    }

    /// JSON object keyed by the output column names
    ///
    /// Extra values beyond the descriptor are ignored.
    pub fn to_object(&self, columns: &[OutputColumn]) -> Map<String, Value> {
        columns
            .iter()
            .zip(&self.values)
            .map(|(c, d)| (c.name.clone(), d.to_json()))
            .collect()
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for Row {}

impl From<Vec<Datum>> for Row {
    fn from(values: Vec<Datum>) -> Self {
        Row { values }
    }
}

impl IntoIterator for Row {
    type Item = Datum;
    type IntoIter = std::vec::IntoIter<Datum>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = &'a Datum;
    type IntoIter = std::slice::Iter<'a, Datum>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
