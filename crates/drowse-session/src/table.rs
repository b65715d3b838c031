//! Concurrent map from session id to live record.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::record::SessionRecord;

/// The in-memory session table.
///
/// Structural operations take the table lock only; per-record state has its
/// own lock. Code holding a record lock may take the table lock, never the
/// reverse, so nothing here locks a record.
#[derive(Debug, Default)]
pub(crate) struct SessionTable {
    sessions: RwLock<HashMap<String, Arc<SessionRecord>>>,
}

impl SessionTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub(crate) fn get(&self, id: &str) -> Option<Arc<SessionRecord>> {
        self.sessions.read().get(id).cloned()
    }

    /// Insert `record` unless its id is already present.
    ///
    /// Returns the record that holds the id afterwards, and whether it is
    /// the one passed in. The first insert for an id wins.
    pub(crate) fn insert_if_absent(
        &self,
        record: Arc<SessionRecord>,
    ) -> (Arc<SessionRecord>, bool) {
        let mut sessions = self.sessions.write();
        match sessions.entry(record.id().to_string()) {
            Entry::Occupied(existing) => {
                trace!(session_id = %record.id(), "Session already in table");
                (Arc::clone(existing.get()), false)
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&record));
                (record, true)
            }
        }
    }

    /// Remove the entry for `record`'s id, but only if it still maps to `record`.
    pub(crate) fn remove_record(&self, record: &SessionRecord) -> bool {
        let mut sessions = self.sessions.write();
        let same = sessions
            .get(record.id())
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), record));
        if same {
            sessions.remove(record.id());
        }
        same
    }

    /// Snapshot of every record, for sweeping without holding the table lock.
    pub(crate) fn records(&self) -> Vec<Arc<SessionRecord>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Remove and return every record.
    pub(crate) fn drain(&self) -> Vec<Arc<SessionRecord>> {
        self.sessions.write().drain().map(|(_, r)| r).collect()
    }
}
