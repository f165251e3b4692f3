//! Data-changed notification

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;

use crate::catalog::{Model, TableId};

/// Receives one call per table whose data version advanced
pub trait ChangeSink: Send + Sync {
    fn data_changed(&self, table: TableId, version: u64);
}

/// Tables whose data may have changed when `table` changes
///
/// Follows every key reference pointing at one of the table's keys, so
/// cascading updates and deletes are covered. Each table appears once.
pub fn affected_tables(model: &Model, table: TableId) -> Vec<TableId> {
    let mut seen = BTreeSet::new();
    let mut order = Vec::new();
    let mut stack = vec![table];
    while let Some(t) = stack.pop() {
        if !seen.insert(t) {
            continue;
        }
        order.push(t);
        for u in model.table(t).uniques.values() {
            for referer in model.unique(*u).table_references.keys() {
                if !seen.contains(referer) {
                    stack.push(*referer);
                }
            }
        }
    }
    order
}

/// Notify `sink` for `table` and everything reachable from it
pub fn notify_changed(model: &Model, table: TableId, version: u64, sink: &dyn ChangeSink) {
    for t in affected_tables(model, table) {
        tracing::trace!(table = %model.table_display(t), version, "data changed");
        sink.data_changed(t, version);
    }
}

/// In-memory sink keeping the latest version per table
#[derive(Debug, Default)]
pub struct ChangeRecorder {
    versions: Mutex<BTreeMap<TableId, u64>>,
}

impl ChangeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self, table: TableId) -> Option<u64> {
        self.versions.lock().get(&table).copied()
    }

    pub fn snapshot(&self) -> BTreeMap<TableId, u64> {
        self.versions.lock().clone()
    }
}

impl ChangeSink for ChangeRecorder {
    fn data_changed(&self, table: TableId, version: u64) {
        let mut versions = self.versions.lock();
        let entry = versions.entry(table).or_insert(version);
        if *entry < version {
            *entry = version;
        }
    }
}
