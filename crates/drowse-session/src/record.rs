//! Session records and the handle callers hold.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::codec::SessionSnapshot;
use crate::error::{Error, Result};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Live in memory.
    Active,
    /// Attributes passivated to the durable store.
    Idled,
    /// Expired or invalidated. Terminal.
    Invalid,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Active => write!(f, "active"),
            SessionState::Idled => write!(f, "idled"),
            SessionState::Invalid => write!(f, "invalid"),
        }
    }
}

/// A value stored on a session.
#[derive(Clone)]
pub enum Attribute {
    /// A serializable value; survives idling.
    Value(Value),
    /// An in-memory object. A session holding one cannot be idled.
    Local(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Attribute::Local(_) => f.write_str("Local(..)"),
        }
    }
}

/// Mutable part of a record, guarded by the record's lock.
#[derive(Debug)]
pub(crate) struct RecordState {
    pub(crate) state: SessionState,
    pub(crate) attributes: HashMap<String, Attribute>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_accessed_at: DateTime<Utc>,
    pub(crate) max_inactive_interval: Duration,
    /// A durable copy survived a de-idle and still needs deleting.
    pub(crate) stale_blob: bool,
}

impl RecordState {
    /// Record an access at `now`. Timestamps never move backwards.
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_accessed_at {
            self.last_accessed_at = now;
        }
    }

    /// Durable form of this state. Fails if any attribute is in-memory only.
    pub(crate) fn snapshot(&self, id: &str) -> Result<SessionSnapshot> {
        let mut attributes = BTreeMap::new();
        for (key, attribute) in &self.attributes {
            match attribute {
                Attribute::Value(v) => {
                    attributes.insert(key.clone(), v.clone());
                }
                Attribute::Local(_) => {
                    return Err(Error::Serialization(format!(
                        "session {id}: attribute '{key}' holds an in-memory value that cannot be serialized"
                    )));
                }
            }
        }
        Ok(SessionSnapshot {
            id: id.to_string(),
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
            max_inactive_interval: self.max_inactive_interval,
            attributes,
        })
    }

    /// Reload attributes from a durable snapshot.
    pub(crate) fn restore(&mut self, snapshot: SessionSnapshot) {
        self.attributes = snapshot
            .attributes
            .into_iter()
            .map(|(k, v)| (k, Attribute::Value(v)))
            .collect();
        self.touch(snapshot.last_accessed_at);
        self.state = SessionState::Active;
    }
}

/// Callbacks from a record into the manager that owns it.
pub(crate) trait Lifecycle: Send + Sync {
    /// Reload an idled record's attributes and count it as accessed. The
    /// caller holds the record lock.
    fn reactivate(&self, record: &SessionRecord, state: &mut RecordState) -> Result<()>;

    /// Invalidate a record. Fails if it is already invalid.
    fn invalidate(&self, record: &SessionRecord) -> Result<()>;
}

/// One session, owned by the session table.
pub(crate) struct SessionRecord {
    id: String,
    state: Mutex<RecordState>,
    owner: Weak<dyn Lifecycle>,
}

impl SessionRecord {
    /// A new active record.
    pub(crate) fn active(
        id: String,
        now: DateTime<Utc>,
        max_inactive_interval: Duration,
        owner: Weak<dyn Lifecycle>,
    ) -> Self {
        Self {
            id,
            state: Mutex::new(RecordState {
                state: SessionState::Active,
                attributes: HashMap::new(),
                created_at: now,
                last_accessed_at: now,
                max_inactive_interval,
                stale_blob: false,
            }),
            owner,
        }
    }

    /// An idled record whose attributes live only in the store.
    pub(crate) fn idled(snapshot: &SessionSnapshot, owner: Weak<dyn Lifecycle>) -> Self {
        Self {
            id: snapshot.id.clone(),
            state: Mutex::new(RecordState {
                state: SessionState::Idled,
                attributes: HashMap::new(),
                created_at: snapshot.created_at,
                last_accessed_at: snapshot.last_accessed_at,
                max_inactive_interval: snapshot.max_inactive_interval,
                stale_blob: false,
            }),
            owner,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RecordState> {
        self.state.lock()
    }
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("id", &self.id)
            .field("state", &self.state.try_lock().map(|st| st.state))
            .finish()
    }
}

/// Handle to a session.
///
/// Cheap to clone; every clone refers to the same record. Attribute
/// operations on an idled session reload it from the store first.
#[derive(Clone)]
pub struct Session {
    record: Arc<SessionRecord>,
}

impl Session {
    pub(crate) fn new(record: Arc<SessionRecord>) -> Self {
        Self { record }
    }

    /// The session id.
    pub fn id(&self) -> &str {
        self.record.id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.record.lock().state
    }

    /// Whether the session's attributes are currently passivated.
    pub fn is_idled(&self) -> bool {
        self.state() == SessionState::Idled
    }

    /// Whether the session is still usable.
    pub fn is_valid(&self) -> bool {
        self.state() != SessionState::Invalid
    }

    /// When the session was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.lock().created_at
    }

    /// When the session was last accessed.
    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        self.record.lock().last_accessed_at
    }

    /// Inactivity limit for this session.
    pub fn max_inactive_interval(&self) -> Duration {
        self.record.lock().max_inactive_interval
    }

    /// Override the inactivity limit for this session. Zero means never expire.
    pub fn set_max_inactive_interval(&self, interval: Duration) -> Result<()> {
        self.with_live(|st| {
            st.max_inactive_interval = interval;
            Ok(())
        })
    }

    /// Get a serializable attribute.
    pub fn get_attribute(&self, key: &str) -> Result<Option<Value>> {
        self.with_live(|st| {
            Ok(match st.attributes.get(key) {
                Some(Attribute::Value(v)) => Some(v.clone()),
                _ => None,
            })
        })
    }

    /// Get a serializable attribute, deserialized into `T`.
    pub fn get_attribute_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_attribute(key)? {
            Some(v) => serde_json::from_value(v).map(Some).map_err(|e| {
                Error::Serialization(format!("attribute '{key}' has an unexpected shape: {e}"))
            }),
            None => Ok(None),
        }
    }

    /// Get an in-memory attribute.
    pub fn get_local_attribute(&self, key: &str) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        self.with_live(|st| {
            Ok(match st.attributes.get(key) {
                Some(Attribute::Local(v)) => Some(Arc::clone(v)),
                _ => None,
            })
        })
    }

    /// Set a serializable attribute.
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| {
            Error::Serialization(format!("attribute '{key}' cannot be serialized: {e}"))
        })?;
        self.with_live(|st| {
            st.attributes.insert(key, Attribute::Value(value));
            Ok(())
        })
    }

    /// Set an in-memory attribute. The session cannot be idled while it holds one.
    pub fn set_local_attribute(
        &self,
        key: impl Into<String>,
        value: Arc<dyn Any + Send + Sync>,
    ) -> Result<()> {
        let key = key.into();
        self.with_live(|st| {
            st.attributes.insert(key, Attribute::Local(value));
            Ok(())
        })
    }

    /// Remove an attribute. Returns whether one was present.
    pub fn remove_attribute(&self, key: &str) -> Result<bool> {
        self.with_live(|st| Ok(st.attributes.remove(key).is_some()))
    }

    /// Names of all attributes, sorted.
    pub fn attribute_names(&self) -> Result<Vec<String>> {
        self.with_live(|st| {
            let mut names: Vec<String> = st.attributes.keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }

    /// Invalidate the session, removing it from memory and the store.
    pub fn invalidate(&self) -> Result<()> {
        match self.record.owner.upgrade() {
            Some(owner) => owner.invalidate(&self.record),
            None => {
                let mut st = self.record.lock();
                if st.state == SessionState::Invalid {
                    return Err(Error::InvalidSession(self.id().to_string()));
                }
                st.state = SessionState::Invalid;
                st.attributes.clear();
                Ok(())
            }
        }
    }

    /// Run `f` on the record state, reloading an idled record first.
    fn with_live<R>(&self, f: impl FnOnce(&mut RecordState) -> Result<R>) -> Result<R> {
        let mut st = self.record.lock();
        match st.state {
            SessionState::Invalid => return Err(Error::InvalidSession(self.id().to_string())),
            SessionState::Idled => {
                let owner = self
                    .record
                    .owner
                    .upgrade()
                    .ok_or_else(|| Error::InvalidSession(self.id().to_string()))?;
                owner.reactivate(&self.record, &mut st)?;
            }
            SessionState::Active => {}
        }
        f(&mut st)
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.record, &other.record)
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
