//! Session manager: resolves, creates, idles and expires sessions.
//!
//! The manager ties together the session table, the durable store and the
//! scavenger:
//! - a request resolves its session id through [`SessionManager::resolve_session`]
//! - the scavenger periodically expires inactive sessions and idles
//!   sessions past the idle-save period to the store
//! - the next access to an idled session reloads it and deletes the stored copy
//!
//! Lock order: a record lock may be held while taking the table lock or
//! calling into the store, never the other way round.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock, elapsed};
use crate::codec::{self, SessionSnapshot};
use crate::config::ManagerConfig;
use crate::deadline::{Deadlines, Due};
use crate::error::{Error, Result};
use crate::listener::SessionListener;
use crate::record::{Lifecycle, RecordState, Session, SessionRecord, SessionState};
use crate::scavenger::{Scavenger, Sweep, SweepReport};
use crate::store::{FileStore, SessionStore};
use crate::table::SessionTable;

/// Fresh ids drawn while the store cannot answer collision checks before
/// an unchecked id is used.
const UNCHECKED_ID_ATTEMPTS: usize = 8;

/// Lifetime counters.
#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    expired: AtomicU64,
    idled: AtomicU64,
    restored: AtomicU64,
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// Sessions in the table (active and idled).
    pub sessions: usize,
    /// Sessions currently idled.
    pub idled: usize,
    /// Sessions created since the manager was built.
    pub created_total: u64,
    /// Sessions expired since the manager was built.
    pub expired_total: u64,
    /// Idle-saves since the manager was built.
    pub idled_total: u64,
    /// Reloads from the store since the manager was built.
    pub restored_total: u64,
}

struct ManagerInner<S: SessionStore> {
    me: Weak<ManagerInner<S>>,
    config: RwLock<ManagerConfig>,
    store: S,
    table: SessionTable,
    clock: Arc<dyn Clock>,
    listeners: RwLock<Vec<Arc<dyn SessionListener>>>,
    /// Ids whose stored copy must be deleted before they may be seen again.
    tombstones: Mutex<HashSet<String>>,
    counters: Counters,
    scavenger: Mutex<Option<Scavenger>>,
}

/// The session manager.
///
/// Cheap to clone; clones share the same sessions. Per-session work holds
/// only that session's lock, so the scavenger never blocks a request for
/// longer than one session's processing.
pub struct SessionManager<S: SessionStore = FileStore> {
    inner: Arc<ManagerInner<S>>,
}

impl SessionManager<FileStore> {
    /// Create a manager backed by a [`FileStore`] in `config.store_directory`.
    pub fn new(config: ManagerConfig) -> Self {
        let store = FileStore::new(config.store_directory.clone(), config.store_retry);
        Self::with_store(config, store)
    }
}

impl<S: SessionStore> SessionManager<S> {
    /// Create a manager with a custom store.
    pub fn with_store(config: ManagerConfig, store: S) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Create a manager with a custom store and time source.
    pub fn with_clock(config: ManagerConfig, store: S, clock: Arc<dyn Clock>) -> Self {
        let inner = Arc::new_cyclic(|me| ManagerInner {
            me: me.clone(),
            config: RwLock::new(config),
            store,
            table: SessionTable::new(),
            clock,
            listeners: RwLock::new(Vec::new()),
            tombstones: Mutex::new(HashSet::new()),
            counters: Counters::default(),
            scavenger: Mutex::new(None),
        });
        Self { inner }
    }

    /// Current configuration.
    pub fn config(&self) -> ManagerConfig {
        self.inner.config.read().clone()
    }

    /// Replace the configuration.
    ///
    /// Periods and flags apply from the next sweep; the default inactivity
    /// limit applies to sessions created afterwards. The store directory is
    /// fixed once the manager is built.
    pub fn configure(&self, config: ManagerConfig) -> Result<()> {
        config.validate()?;
        let mut current = self.inner.config.write();
        if current.store_directory != config.store_directory {
            return Err(Error::Config(format!(
                "store_directory is fixed at {}",
                current.store_directory.display()
            )));
        }
        *current = config;
        debug!("Session manager reconfigured");
        Ok(())
    }

    /// The durable store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Register a lifecycle listener.
    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Number of sessions in memory (active and idled).
    pub fn len(&self) -> usize {
        self.inner.table.len()
    }

    /// Whether no sessions are in memory.
    pub fn is_empty(&self) -> bool {
        self.inner.table.len() == 0
    }

    /// Create a new active session with a fresh id.
    pub fn create_session(&self) -> Session {
        self.inner.create()
    }

    /// Access an existing session.
    ///
    /// Refreshes its last-accessed time and reloads it from the store if it
    /// was idled. Returns `None` if the id is unknown, expired, or cannot be
    /// restored.
    pub fn get_session(&self, id: &str) -> Option<Session> {
        match self.inner.access(id) {
            Ok(Some(record)) => Some(Session::new(record)),
            Ok(None) => None,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Could not resolve session, treating as absent");
                None
            }
        }
    }

    /// Resolve the session for a request: access `requested` if it names a
    /// live session, otherwise create a new one.
    pub fn resolve_session(&self, requested: Option<&str>) -> Session {
        requested
            .and_then(|id| self.get_session(id))
            .unwrap_or_else(|| self.create_session())
    }

    /// Invalidate a session by id, in memory and in the store.
    ///
    /// Returns `true` if a live session was invalidated. Invalidating an
    /// unknown or already-invalid id is a no-op.
    pub fn invalidate(&self, id: &str) -> bool {
        let record = match self.inner.table.get(id) {
            Some(record) => record,
            None => match self.inner.adopt(id) {
                Ok(Some((record, _))) => record,
                Ok(None) => return false,
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Invalidating unrestorable stored session");
                    self.inner.delete_stored(id);
                    return false;
                }
            },
        };
        self.inner.invalidate(&record).is_ok()
    }

    /// Adopt every stored session not already in memory as an idled session.
    ///
    /// Returns the number adopted.
    pub fn restore(&self) -> Result<usize> {
        let (adopted, failures) = self.inner.adopt_all()?;
        info!(adopted, failures, "Restored stored sessions");
        Ok(adopted)
    }

    /// Run one scavenger sweep now.
    pub fn scavenge(&self) -> SweepReport {
        self.inner.sweep()
    }

    /// Start the scavenger. Requires a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let config = self.config();
        config.validate()?;

        let mut slot = self.inner.scavenger.lock();
        if slot.is_some() {
            return Err(Error::AlreadyRunning);
        }

        if config.restore_on_start
            && let Err(e) = self.restore()
        {
            warn!(error = %e, "Could not restore stored sessions at start");
        }

        *slot = Some(Scavenger::spawn(self.inner.me.clone())?);
        info!(
            max_inactive_interval = ?config.max_inactive_interval,
            scavenge_period = ?config.scavenge_period,
            idle_save_period = ?config.idle_save_period,
            store_directory = %config.store_directory.display(),
            "Session manager started"
        );
        Ok(())
    }

    /// Whether the scavenger is running.
    pub fn is_running(&self) -> bool {
        self.inner.scavenger.lock().is_some()
    }

    /// Stop the scavenger and discard in-memory state.
    ///
    /// No sweep is scheduled after this returns. If `save_on_shutdown` is set,
    /// every active session is idled to the store first; failures are logged
    /// and do not stop the shutdown.
    pub async fn stop(&self) -> Result<()> {
        let scavenger = self.inner.scavenger.lock().take().ok_or(Error::NotRunning)?;
        scavenger.shutdown().await;

        let inner = Arc::clone(&self.inner);
        let saved = tokio::task::spawn_blocking(move || inner.flush_and_clear())
            .await
            .map_err(|e| Error::Runtime(format!("shutdown flush failed: {e}")))?;

        info!(saved, "Session manager stopped");
        Ok(())
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> ManagerStats {
        let records = self.inner.table.records();
        let idled = records
            .iter()
            .filter(|r| r.lock().state == SessionState::Idled)
            .count();
        let counters = &self.inner.counters;
        ManagerStats {
            sessions: records.len(),
            idled,
            created_total: counters.created.load(Ordering::Relaxed),
            expired_total: counters.expired.load(Ordering::Relaxed),
            idled_total: counters.idled.load(Ordering::Relaxed),
            restored_total: counters.restored.load(Ordering::Relaxed),
        }
    }
}

impl<S: SessionStore> Clone for SessionManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: SessionStore> ManagerInner<S> {
    fn owner(&self) -> Weak<dyn Lifecycle> {
        self.me.clone()
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn notify(&self, event: impl Fn(&dyn SessionListener)) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            event(listener.as_ref());
        }
    }

    fn is_tombstoned(&self, id: &str) -> bool {
        self.tombstones.lock().contains(id)
    }

    fn id_in_use(&self, id: &str, attempt: usize) -> bool {
        if self.table.contains(id) || self.is_tombstoned(id) {
            return true;
        }
        match self.store.contains(id) {
            Ok(found) => found,
            Err(e) if attempt < UNCHECKED_ID_ATTEMPTS => {
                warn!(session_id = %id, error = %e, "Could not check store for id collision, drawing another id");
                true
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "Store unavailable for id collision check, using unchecked id");
                false
            }
        }
    }

    fn create(&self) -> Session {
        let now = self.now();
        let max_inactive = self.config.read().max_inactive_interval;
        let mut attempt = 0;
        loop {
            let id = new_session_id();
            attempt += 1;
            if self.id_in_use(&id, attempt) {
                continue;
            }

            let record = Arc::new(SessionRecord::active(id, now, max_inactive, self.owner()));
            let (record, inserted) = self.table.insert_if_absent(record);
            if !inserted {
                continue;
            }

            self.counters.created.fetch_add(1, Ordering::Relaxed);
            debug!(session_id = %record.id(), "Session created");
            self.notify(|l| l.session_created(record.id()));
            return Session::new(record);
        }
    }

    /// Access path for a request.
    fn access(&self, id: &str) -> Result<Option<Arc<SessionRecord>>> {
        let record = match self.table.get(id) {
            Some(record) => record,
            None => match self.adopt(id)? {
                Some((record, _)) => record,
                None => return Ok(None),
            },
        };

        let now = self.now();
        let mut st = record.lock();
        if st.state == SessionState::Invalid {
            return Ok(None);
        }

        let deadlines = Deadlines {
            max_inactive: st.max_inactive_interval,
            idle_after: Duration::ZERO,
        };
        if deadlines.is_expired(elapsed(now, st.last_accessed_at)) {
            debug!(session_id = %id, "Session expired before access");
            self.destroy_locked(&record, &mut st);
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        if st.state == SessionState::Idled {
            self.reactivate_locked(&record, &mut st)?;
        }
        st.touch(now);
        drop(st);

        Ok(Some(record))
    }

    /// Load a stored session into the table as an idled record.
    ///
    /// Returns the record now holding the id and whether this call inserted it.
    fn adopt(&self, id: &str) -> Result<Option<(Arc<SessionRecord>, bool)>> {
        if self.is_tombstoned(id) {
            return Ok(None);
        }
        let Some(blob) = self.store.load(id)? else {
            // A concurrent access may have adopted and restored it already.
            return Ok(self.table.get(id).map(|record| (record, false)));
        };
        if codec::is_tombstone(&blob) {
            debug!(session_id = %id, "Stored copy marks a deleted session");
            self.delete_stored(id);
            return Ok(None);
        }
        let snapshot = match decode_for(id, &blob) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.handle_unrestorable(id, &e);
                return Err(e);
            }
        };

        let record = Arc::new(SessionRecord::idled(&snapshot, self.owner()));
        let (record, inserted) = self.table.insert_if_absent(record);
        if inserted {
            debug!(session_id = %id, "Adopted stored session");
        }
        Ok(Some((record, inserted)))
    }

    /// Adopt every stored session not yet in the table.
    fn adopt_all(&self) -> Result<(usize, usize)> {
        let mut adopted = 0;
        let mut failures = 0;
        for id in self.store.ids()? {
            if self.table.contains(&id) || self.is_tombstoned(&id) {
                continue;
            }
            match self.adopt(&id) {
                Ok(Some((_, true))) => adopted += 1,
                Ok(_) => {}
                Err(e) => {
                    failures += 1;
                    warn!(session_id = %id, error = %e, "Could not adopt stored session");
                }
            }
        }
        Ok((adopted, failures))
    }

    fn handle_unrestorable(&self, id: &str, error: &Error) {
        if self.config.read().delete_unrestorable {
            match self.store.delete(id) {
                Ok(()) => warn!(session_id = %id, error = %error, "Deleted unrestorable stored session"),
                Err(e) => warn!(session_id = %id, error = %e, "Could not delete unrestorable stored session"),
            }
        } else {
            warn!(session_id = %id, error = %error, "Stored session cannot be restored");
        }
    }

    /// Reload an idled record from the store. Caller holds the record lock.
    fn reactivate_locked(&self, record: &SessionRecord, st: &mut RecordState) -> Result<()> {
        let id = record.id();
        let Some(blob) = self.store.load(id)? else {
            warn!(session_id = %id, "Idled session has no stored copy, discarding");
            self.discard_locked(record, st);
            return Err(Error::InvalidSession(id.to_string()));
        };

        let snapshot = match decode_for(id, &blob) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.handle_unrestorable(id, &e);
                self.discard_locked(record, st);
                return Err(e);
            }
        };

        st.restore(snapshot);
        st.stale_blob = false;
        if let Err(e) = self.store.delete(id) {
            warn!(session_id = %id, error = %e, "Could not delete stored copy after restore, will retry");
            st.stale_blob = true;
        }

        self.counters.restored.fetch_add(1, Ordering::Relaxed);
        debug!(session_id = %id, "Session restored from store");
        self.notify(|l| l.session_restored(id));
        Ok(())
    }

    /// Idle a record to the store. Caller holds the record lock.
    ///
    /// On failure the record stays active with its attributes intact.
    fn passivate_locked(&self, record: &SessionRecord, st: &mut RecordState) -> Result<()> {
        let id = record.id();
        let blob = codec::encode(&st.snapshot(id)?)?;
        self.store.save(id, &blob)?;

        st.attributes.clear();
        st.state = SessionState::Idled;
        st.stale_blob = false;

        self.counters.idled.fetch_add(1, Ordering::Relaxed);
        debug!(session_id = %id, bytes = blob.len(), "Session idled to store");
        self.notify(|l| l.session_idled(id));
        Ok(())
    }

    /// Make a record invalid and drop it from the table, leaving the store alone.
    fn discard_locked(&self, record: &SessionRecord, st: &mut RecordState) {
        st.state = SessionState::Invalid;
        st.attributes.clear();
        st.stale_blob = false;
        self.table.remove_record(record);
        self.notify(|l| l.session_destroyed(record.id()));
    }

    /// Make a record invalid everywhere. Caller holds the record lock.
    fn destroy_locked(&self, record: &SessionRecord, st: &mut RecordState) {
        // Tombstone first so nothing adopts the stored copy once the record
        // leaves the table.
        self.tombstones.lock().insert(record.id().to_string());
        self.discard_locked(record, st);
        self.delete_stored(record.id());
    }

    /// Delete a stored copy, keeping the id tombstoned until deletion succeeds.
    ///
    /// If the delete fails the stored copy is overwritten with a deletion
    /// marker, so a later process refuses the id too.
    fn delete_stored(&self, id: &str) {
        self.tombstones.lock().insert(id.to_string());
        match self.store.delete(id) {
            Ok(()) => {
                self.tombstones.lock().remove(id);
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "Could not delete stored session, will retry on next sweep");
                self.mark_deleted(id);
            }
        }
    }

    fn mark_deleted(&self, id: &str) -> bool {
        match codec::encode_tombstone(id).and_then(|blob| self.store.save(id, &blob)) {
            Ok(()) => {
                debug!(session_id = %id, "Replaced stored session with a deletion marker");
                true
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "Could not mark stored session as deleted");
                false
            }
        }
    }

    fn retry_tombstones(&self, report: &mut SweepReport) {
        let pending: Vec<String> = self.tombstones.lock().iter().cloned().collect();
        for id in pending {
            match self.store.delete(&id) {
                Ok(()) => {
                    self.tombstones.lock().remove(&id);
                    debug!(session_id = %id, "Deleted stored copy of destroyed session");
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(session_id = %id, error = %e, "Still cannot delete stored session");
                }
            }
        }
    }

    fn sweep_record(
        &self,
        record: &SessionRecord,
        now: DateTime<Utc>,
        idle_after: Duration,
    ) -> Result<Option<Due>> {
        let mut st = record.lock();
        if st.state == SessionState::Invalid {
            return Ok(None);
        }

        let deadlines = Deadlines {
            max_inactive: st.max_inactive_interval,
            idle_after,
        };
        match deadlines.evaluate(now, st.last_accessed_at, st.state) {
            Some(Due::Expire) => {
                debug!(session_id = %record.id(), state = %st.state, "Session expired");
                self.destroy_locked(record, &mut st);
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
                Ok(Some(Due::Expire))
            }
            Some(Due::Idle) => {
                self.passivate_locked(record, &mut st)?;
                Ok(Some(Due::Idle))
            }
            None => {
                if st.state == SessionState::Active && st.stale_blob {
                    self.store.delete(record.id())?;
                    st.stale_blob = false;
                } else if st.state == SessionState::Idled && !self.store.contains(record.id())? {
                    warn!(session_id = %record.id(), "Idled session lost its stored copy, discarding");
                    self.discard_locked(record, &mut st);
                }
                Ok(None)
            }
        }
    }

    /// Idle every active session if configured, then empty the table.
    ///
    /// Stored copies that must not outlive the process (those of destroyed
    /// sessions, and stale copies of discarded active sessions) are deleted
    /// or replaced with deletion markers before returning.
    fn flush_and_clear(&self) -> usize {
        let save = self.config.read().save_on_shutdown;
        let mut saved = 0;
        for record in self.table.drain() {
            let mut st = record.lock();
            if save && st.state == SessionState::Active {
                match self.passivate_locked(&record, &mut st) {
                    Ok(()) => saved += 1,
                    Err(e) => {
                        warn!(session_id = %record.id(), error = %e, "Could not save session at shutdown, discarding")
                    }
                }
            }
            if st.state == SessionState::Active && st.stale_blob {
                self.delete_stored(record.id());
            }
            // Handles still held by callers stop working; an idled copy remains.
            st.state = SessionState::Invalid;
            st.attributes.clear();
            st.stale_blob = false;
        }

        let mut report = SweepReport::default();
        self.retry_tombstones(&mut report);
        let pending: Vec<String> = self.tombstones.lock().iter().cloned().collect();
        for id in pending {
            if self.mark_deleted(&id) {
                warn!(session_id = %id, "Stored session left behind as a deletion marker");
            }
        }
        saved
    }
}

impl<S: SessionStore> Lifecycle for ManagerInner<S> {
    fn reactivate(&self, record: &SessionRecord, state: &mut RecordState) -> Result<()> {
        self.reactivate_locked(record, state)?;
        state.touch(self.now());
        Ok(())
    }

    fn invalidate(&self, record: &SessionRecord) -> Result<()> {
        let mut st = record.lock();
        if st.state == SessionState::Invalid {
            return Err(Error::InvalidSession(record.id().to_string()));
        }
        debug!(session_id = %record.id(), "Session invalidated");
        self.destroy_locked(record, &mut st);
        Ok(())
    }
}

impl<S: SessionStore> Sweep for ManagerInner<S> {
    fn period(&self) -> Duration {
        self.config.read().scavenge_period
    }

    fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = self.now();
        let idle_after = self.config.read().idle_save_period;

        self.retry_tombstones(&mut report);

        match self.adopt_all() {
            Ok((adopted, failures)) => {
                report.adopted += adopted;
                report.failures += failures;
            }
            Err(e) => {
                report.failures += 1;
                warn!(error = %e, "Could not list stored sessions");
            }
        }

        for record in self.table.records() {
            report.checked += 1;
            match self.sweep_record(&record, now, idle_after) {
                Ok(Some(Due::Expire)) => report.expired += 1,
                Ok(Some(Due::Idle)) => report.idled += 1,
                Ok(None) => {}
                Err(e) => {
                    report.failures += 1;
                    warn!(session_id = %record.id(), error = %e, "Sweep failed for session, will retry");
                }
            }
        }

        report
    }
}

/// Decode a stored session and check it belongs to `id`.
fn decode_for(id: &str, blob: &[u8]) -> Result<SessionSnapshot> {
    let snapshot = codec::decode(blob)?;
    if snapshot.id != id {
        return Err(Error::Serialization(format!(
            "stored session {id} claims id {}",
            snapshot.id
        )));
    }
    Ok(snapshot)
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn setup(max_inactive: u64, idle: u64) -> (SessionManager<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let config = ManagerConfig::new()
            .with_max_inactive_interval(secs(max_inactive))
            .with_scavenge_period(secs(3))
            .with_idle_save_period(secs(idle));
        let manager = SessionManager::with_clock(config, MemoryStore::new(), clock.clone());
        (manager, clock)
    }

    fn stored(manager: &SessionManager<MemoryStore>, id: &str, last_accessed: DateTime<Utc>) {
        let mut attributes = BTreeMap::new();
        attributes.insert("test".to_string(), json!("test"));
        let snapshot = SessionSnapshot {
            id: id.to_string(),
            created_at: last_accessed,
            last_accessed_at: last_accessed,
            max_inactive_interval: secs(200),
            attributes,
        };
        manager
            .store()
            .save(id, &codec::encode(&snapshot).unwrap())
            .unwrap();
    }

    #[test]
    fn test_create_and_access() {
        let (manager, clock) = setup(200, 0);
        let session = manager.create_session();
        session.set_attribute("test", "test").unwrap();
        let created = session.last_accessed_at();

        clock.advance(secs(10));
        let again = manager.get_session(session.id()).unwrap();
        assert_eq!(again, session);
        assert_eq!(again.get_attribute("test").unwrap(), Some(json!("test")));
        assert!(again.last_accessed_at() > created);
        assert_eq!(again.created_at(), created);
    }

    #[test]
    fn test_resolve_unknown_creates() {
        let (manager, _clock) = setup(200, 0);
        let session = manager.resolve_session(Some("no-such-session"));
        assert_ne!(session.id(), "no-such-session");
        assert_eq!(manager.len(), 1);

        let same = manager.resolve_session(Some(session.id()));
        assert_eq!(same, session);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_idle_then_access_restores() {
        let (manager, clock) = setup(200, 5);
        let session = manager.create_session();
        session.set_attribute("test", "test").unwrap();
        let id = session.id().to_string();

        clock.advance(secs(6));
        let report = manager.scavenge();
        assert_eq!(report.idled, 1);
        assert!(session.is_idled());
        assert_eq!(manager.store().len(), 1);
        assert_eq!(manager.len(), 1);

        let restored = manager.get_session(&id).unwrap();
        assert_eq!(restored.id(), id);
        assert!(!restored.is_idled());
        assert_eq!(restored.get_attribute("test").unwrap(), Some(json!("test")));
        assert_eq!(manager.store().len(), 0);
    }

    #[test]
    fn test_idle_is_not_repeated() {
        let (manager, clock) = setup(200, 5);
        manager.create_session();
        clock.advance(secs(6));
        assert_eq!(manager.scavenge().idled, 1);
        clock.advance(secs(6));
        assert_eq!(manager.scavenge().idled, 0);
        assert_eq!(manager.stats().idled_total, 1);
    }

    #[test]
    fn test_held_handle_deidles_transparently() {
        let (manager, clock) = setup(200, 5);
        let session = manager.create_session();
        session.set_attribute("cart", json!([1, 2])).unwrap();

        clock.advance(secs(6));
        manager.scavenge();
        assert!(session.is_idled());

        assert_eq!(session.get_attribute("cart").unwrap(), Some(json!([1, 2])));
        assert!(!session.is_idled());
        assert_eq!(manager.store().len(), 0);
    }

    #[test]
    fn test_held_handle_deidle_counts_as_access() {
        let (manager, clock) = setup(200, 5);
        let session = manager.create_session();
        session.set_attribute("k", "v").unwrap();

        clock.advance(secs(6));
        manager.scavenge();
        assert!(session.is_idled());

        clock.advance(secs(3));
        assert_eq!(session.get_attribute("k").unwrap(), Some(json!("v")));
        assert_eq!(session.last_accessed_at(), clock.now());

        clock.advance(secs(3));
        assert_eq!(manager.scavenge().idled, 0);
        assert!(!session.is_idled());
        assert_eq!(manager.stats().idled_total, 1);
    }

    #[test]
    fn test_expiry_removes_everything() {
        let (manager, clock) = setup(10, 5);
        let session = manager.create_session();
        session.set_attribute("k", "v").unwrap();

        clock.advance(secs(6));
        manager.scavenge();
        assert_eq!(manager.store().len(), 1);

        clock.advance(secs(5));
        let report = manager.scavenge();
        assert_eq!(report.expired, 1);
        assert_eq!(manager.len(), 0);
        assert_eq!(manager.store().len(), 0);
        assert!(!session.is_valid());
        assert!(matches!(
            session.get_attribute("k"),
            Err(Error::InvalidSession(_))
        ));
        assert!(manager.get_session(session.id()).is_none());
    }

    #[test]
    fn test_expire_wins_over_idle() {
        let (manager, clock) = setup(5, 5);
        let session = manager.create_session();

        clock.advance(secs(5));
        let report = manager.scavenge();
        assert_eq!(report.expired, 1);
        assert_eq!(report.idled, 0);
        assert_eq!(session.state(), SessionState::Invalid);
        assert_eq!(manager.store().len(), 0);
    }

    #[test]
    fn test_expired_on_access_before_sweep() {
        let (manager, clock) = setup(10, 0);
        let session = manager.create_session();
        clock.advance(secs(11));

        assert!(manager.get_session(session.id()).is_none());
        assert!(!session.is_valid());
        assert_eq!(manager.stats().expired_total, 1);
    }

    #[test]
    fn test_per_session_interval() {
        let (manager, clock) = setup(10, 0);
        let session = manager.create_session();
        session.set_max_inactive_interval(secs(100)).unwrap();

        clock.advance(secs(50));
        assert_eq!(manager.scavenge().expired, 0);
        assert!(manager.get_session(session.id()).is_some());
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let (manager, _clock) = setup(200, 0);
        let session = manager.create_session();
        let id = session.id().to_string();

        assert!(manager.invalidate(&id));
        assert!(!manager.invalidate(&id));
        assert!(matches!(session.invalidate(), Err(Error::InvalidSession(_))));
        assert!(manager.get_session(&id).is_none());
    }

    #[test]
    fn test_handle_invalidate_removes_stored_copy() {
        let (manager, clock) = setup(200, 5);
        let session = manager.create_session();
        clock.advance(secs(6));
        manager.scavenge();
        assert_eq!(manager.store().len(), 1);

        session.invalidate().unwrap();
        assert_eq!(manager.store().len(), 0);
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_local_attribute_blocks_idling() {
        let (manager, clock) = setup(200, 5);
        let session = manager.create_session();
        session.set_attribute("plain", 1).unwrap();
        session
            .set_local_attribute("connection", Arc::new(String::from("live")))
            .unwrap();

        clock.advance(secs(6));
        let report = manager.scavenge();
        assert_eq!(report.idled, 0);
        assert_eq!(report.failures, 1);
        assert!(!session.is_idled());
        assert_eq!(session.get_attribute("plain").unwrap(), Some(json!(1)));
        assert_eq!(manager.store().len(), 0);

        session.remove_attribute("connection").unwrap();
        assert_eq!(manager.scavenge().idled, 1);
    }

    #[test]
    fn test_store_only_session_is_adopted_on_access() {
        let (manager, clock) = setup(200, 5);
        stored(&manager, "restart-survivor", clock.now());

        let session = manager.get_session("restart-survivor").unwrap();
        assert_eq!(session.get_attribute("test").unwrap(), Some(json!("test")));
        assert!(!session.is_idled());
        assert_eq!(manager.store().len(), 0);
        assert_eq!(manager.stats().restored_total, 1);
    }

    #[test]
    fn test_sweep_expires_store_only_session() {
        let (manager, clock) = setup(200, 5);
        stored(&manager, "stale", clock.now());

        clock.advance(secs(201));
        let report = manager.scavenge();
        assert_eq!(report.adopted, 1);
        assert_eq!(report.expired, 1);
        assert_eq!(manager.len(), 0);
        assert_eq!(manager.store().len(), 0);
    }

    #[test]
    fn test_corrupt_blob_treated_as_no_session() {
        let (manager, _clock) = setup(200, 5);
        manager.store().save("broken", b"{ not json").unwrap();

        assert!(manager.get_session("broken").is_none());
        assert_eq!(manager.store().len(), 1);

        let fresh = manager.resolve_session(Some("broken"));
        assert_ne!(fresh.id(), "broken");
    }

    #[test]
    fn test_corrupt_blob_deleted_when_configured() {
        let (manager, _clock) = setup(200, 5);
        let config = manager.config().with_delete_unrestorable(true);
        manager.configure(config).unwrap();
        manager.store().save("broken", b"{ not json").unwrap();

        assert!(manager.get_session("broken").is_none());
        assert_eq!(manager.store().len(), 0);
    }

    #[test]
    fn test_mismatched_blob_rejected() {
        let (manager, clock) = setup(200, 5);
        stored(&manager, "original", clock.now());
        let blob = manager.store().load("original").unwrap().unwrap();
        manager.store().save("forged", &blob).unwrap();

        assert!(manager.get_session("forged").is_none());
    }

    #[test]
    fn test_idled_shell_without_blob_is_discarded() {
        let (manager, clock) = setup(200, 5);
        let session = manager.create_session();
        let id = session.id().to_string();
        clock.advance(secs(6));
        manager.scavenge();

        manager.store().delete(&id).unwrap();
        manager.scavenge();
        assert_eq!(manager.len(), 0);
        assert!(manager.get_session(&id).is_none());
    }

    #[test]
    fn test_configure_rejects_new_store_directory() {
        let (manager, _clock) = setup(200, 5);
        let moved = manager.config().with_store_directory("/elsewhere");
        assert!(matches!(manager.configure(moved), Err(Error::Config(_))));

        let faster = manager.config().with_scavenge_period(secs(1));
        manager.configure(faster).unwrap();
        assert_eq!(manager.config().scavenge_period, secs(1));
    }

    #[derive(Default)]
    struct Recorder {
        created: AtomicUsize,
        destroyed: AtomicUsize,
        idled: AtomicUsize,
        restored: AtomicUsize,
    }

    impl SessionListener for Recorder {
        fn session_created(&self, _id: &str) {
            self.created.fetch_add(1, Ordering::SeqCst);
        }
        fn session_destroyed(&self, _id: &str) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
        fn session_idled(&self, _id: &str) {
            self.idled.fetch_add(1, Ordering::SeqCst);
        }
        fn session_restored(&self, _id: &str) {
            self.restored.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_listener_sees_lifecycle() {
        let (manager, clock) = setup(20, 5);
        let recorder = Arc::new(Recorder::default());
        manager.add_listener(recorder.clone());

        let session = manager.create_session();
        clock.advance(secs(6));
        manager.scavenge();
        manager.get_session(session.id()).unwrap();
        clock.advance(secs(21));
        manager.scavenge();

        assert_eq!(recorder.created.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.idled.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.restored.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stats() {
        let (manager, clock) = setup(200, 5);
        manager.create_session();
        manager.create_session();
        clock.advance(secs(6));
        manager.scavenge();
        manager.create_session();

        let stats = manager.stats();
        assert_eq!(stats.sessions, 3);
        assert_eq!(stats.idled, 2);
        assert_eq!(stats.created_total, 3);
        assert_eq!(stats.idled_total, 2);
    }

    #[test]
    fn test_start_requires_runtime() {
        let (manager, _clock) = setup(200, 5);
        assert!(matches!(manager.start(), Err(Error::Runtime(_))));
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let (manager, _clock) = setup(200, 5);
        manager.start().unwrap();
        assert!(manager.is_running());
        assert!(matches!(manager.start(), Err(Error::AlreadyRunning)));

        let session = manager.create_session();
        session.set_attribute("k", "v").unwrap();

        manager.stop().await.unwrap();
        assert!(!manager.is_running());
        assert!(matches!(manager.stop().await, Err(Error::NotRunning)));

        // Flushed to the store; the old handle is detached.
        assert_eq!(manager.store().len(), 1);
        assert_eq!(manager.len(), 0);
        assert!(!session.is_valid());

        let back = manager.get_session(session.id()).unwrap();
        assert_eq!(back.get_attribute("k").unwrap(), Some(json!("v")));
    }
}
