//! Per-handle synchronization state of domain objects.
//!
//! Links each in-memory object to its store node and remembers a content
//! hash of what was last written or read, so unchanged objects are not
//! rewritten. Changes made while a transaction is open are journaled and
//! undone if the transaction does not commit.

use std::collections::{BTreeSet, HashMap};

use ogm_core::ObjRef;
use ogm_graph::{NodeId, TxId};
use parking_lot::Mutex;

use crate::connection::TxListener;

/// Whether an object differs from what the store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Never stored or loaded by this handle.
    New,
    /// Matches the last stored or loaded state.
    Clean,
    /// Modified since the last store or load.
    Dirty,
}

/// Read-only view of an object's synchronization record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncInfo {
    pub node_id: Option<NodeId>,
    pub state: SyncState,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SyncEntry {
    pub node_id: NodeId,
    /// Hash of the last synchronized content; `None` until first written.
    pub snapshot: Option<String>,
    /// Reference fields whose stored relationships were never loaded.
    pub unresolved: BTreeSet<String>,
}

#[derive(Default)]
struct Table {
    entries: HashMap<ObjRef, SyncEntry>,
    by_node: HashMap<NodeId, ObjRef>,
    /// Entries as they were before the open transaction touched them.
    journal: Option<(TxId, HashMap<ObjRef, Option<SyncEntry>>)>,
}

impl Table {
    fn record_previous(&mut self, tx: Option<TxId>, obj: ObjRef) {
        let Some(tx) = tx else {
            return;
        };
        if self.journal.as_ref().map(|(id, _)| *id) != Some(tx) {
            self.journal = Some((tx, HashMap::new()));
        }
        let previous = self.entries.get(&obj).cloned();
        if let Some((_, saved)) = self.journal.as_mut() {
            saved.entry(obj).or_insert(previous);
        }
    }

    fn put(&mut self, obj: ObjRef, entry: Option<SyncEntry>) {
        if let Some(old) = self.entries.remove(&obj) {
            self.by_node.remove(&old.node_id);
        }
        if let Some(entry) = entry {
            self.by_node.insert(entry.node_id, obj);
            self.entries.insert(obj, entry);
        }
    }
}

/// Synchronization records of one domain access handle.
#[derive(Default)]
pub(crate) struct SyncTable {
    table: Mutex<Table>,
}

impl SyncTable {
    pub fn entry(&self, obj: ObjRef) -> Option<SyncEntry> {
        self.table.lock().entries.get(&obj).cloned()
    }

    pub fn node_id(&self, obj: ObjRef) -> Option<NodeId> {
        self.table.lock().entries.get(&obj).map(|e| e.node_id)
    }

    pub fn object_for(&self, node: NodeId) -> Option<ObjRef> {
        self.table.lock().by_node.get(&node).copied()
    }

    /// Insert or replace the record of `obj`, journaling the previous one
    /// when `tx` is open.
    pub fn set(&self, tx: Option<TxId>, obj: ObjRef, entry: SyncEntry) {
        let mut table = self.table.lock();
        table.record_previous(tx, obj);
        table.put(obj, Some(entry));
    }
}

impl TxListener for SyncTable {
    fn transaction_closed(&self, tx: TxId, committed: bool) {
        let mut table = self.table.lock();
        let Some((id, saved)) = table.journal.take() else {
            return;
        };
        if id != tx {
            table.journal = Some((id, saved));
            return;
        }
        if committed {
            return;
        }
        let restored = saved.len();
        for (obj, previous) in saved {
            table.put(obj, previous);
        }
        tracing::debug!(%tx, restored, "Restored sync records after rollback");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogm_core::{ClassBuilder, DomainGraph, TypeRegistry};

    fn objects(n: usize) -> Vec<ObjRef> {
        let mut reg = TypeRegistry::new();
        let ty = ClassBuilder::new("t.Thing").build(&mut reg).unwrap();
        let mut graph = DomainGraph::new();
        (0..n).map(|_| graph.create(&ty).unwrap()).collect()
    }

    fn entry(node_id: NodeId, snapshot: &str) -> SyncEntry {
        SyncEntry {
            node_id,
            snapshot: Some(snapshot.to_string()),
            unresolved: BTreeSet::new(),
        }
    }

    #[test]
    fn test_rollback_restores_previous_records() {
        let objs = objects(2);
        let table = SyncTable::default();
        table.set(None, objs[0], entry(1, "a"));

        let tx = TxId::new();
        table.set(Some(tx), objs[0], entry(1, "b"));
        table.set(Some(tx), objs[0], entry(1, "c"));
        table.set(Some(tx), objs[1], entry(2, "x"));
        assert_eq!(table.object_for(2), Some(objs[1]));

        table.transaction_closed(tx, false);
        assert_eq!(table.entry(objs[0]), Some(entry(1, "a")));
        assert_eq!(table.entry(objs[1]), None);
        assert_eq!(table.object_for(2), None);
    }

    #[test]
    fn test_commit_keeps_records() {
        let objs = objects(1);
        let table = SyncTable::default();
        let tx = TxId::new();
        table.set(Some(tx), objs[0], entry(5, "a"));
        table.transaction_closed(tx, true);
        assert_eq!(table.node_id(objs[0]), Some(5));
        assert_eq!(table.object_for(5), Some(objs[0]));
    }
}
