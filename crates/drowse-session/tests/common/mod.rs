//! Common test utilities for session engine integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use drowse_session::{
    Error, ManagerConfig, ManualClock, MemoryStore, Result, SessionManager, SessionStore,
};

/// Which store operation should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Save,
    Load,
    Delete,
    Contains,
}

/// A [`MemoryStore`] that fails chosen operations for chosen ids.
///
/// Clones share blobs and injected failures, so two managers can run over
/// the same store one after the other.
#[derive(Debug, Default, Clone)]
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failing: Arc<Mutex<HashSet<(Op, String)>>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` fail for `id` until [`FlakyStore::heal`] is called.
    pub fn fail(&self, op: Op, id: &str) {
        self.failing.lock().insert((op, id.to_string()));
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        self.failing.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    fn check(&self, op: Op, id: &str) -> Result<()> {
        if self.failing.lock().contains(&(op, id.to_string())) {
            return Err(Error::StoreIo {
                context: format!("session {id}"),
                source: std::io::Error::other("injected failure"),
            });
        }
        Ok(())
    }
}

impl SessionStore for FlakyStore {
    fn save(&self, id: &str, blob: &[u8]) -> Result<()> {
        self.check(Op::Save, id)?;
        self.inner.save(id, blob)
    }

    fn load(&self, id: &str) -> Result<Option<Vec<u8>>> {
        self.check(Op::Load, id)?;
        self.inner.load(id)
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.check(Op::Delete, id)?;
        self.inner.delete(id)
    }

    fn ids(&self) -> Result<Vec<String>> {
        self.inner.ids()
    }

    fn contains(&self, id: &str) -> Result<bool> {
        self.check(Op::Contains, id)?;
        self.inner.contains(id)
    }
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// A manager over a [`FlakyStore`] driven by a manual clock.
pub fn flaky_manager(
    max_inactive: u64,
    idle_after: u64,
) -> (SessionManager<FlakyStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let manager = manager_over(FlakyStore::new(), clock.clone(), max_inactive, idle_after);
    (manager, clock)
}

/// A manager over `store`, sharing the clock of an earlier manager.
pub fn manager_over(
    store: FlakyStore,
    clock: Arc<ManualClock>,
    max_inactive: u64,
    idle_after: u64,
) -> SessionManager<FlakyStore> {
    let config = ManagerConfig::new()
        .with_max_inactive_interval(secs(max_inactive))
        .with_idle_save_period(secs(idle_after));
    SessionManager::with_clock(config, store, clock)
}

/// Number of stored session files in `dir`.
pub fn session_files(dir: &Path) -> usize {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "session"))
            .count(),
        Err(_) => 0,
    }
}
