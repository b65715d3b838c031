//! Durable encoding of sessions.
//!
//! A stored session is a JSON document carrying a format version, the
//! session id, its timestamps, its inactivity limit and its attributes.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// The durable fields of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session id.
    pub id: String,

    /// When the session was created.
    pub created_at: DateTime<Utc>,

    /// When the session was last accessed.
    pub last_accessed_at: DateTime<Utc>,

    /// Inactivity limit for this session.
    pub max_inactive_interval: Duration,

    /// Attribute values.
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    #[serde(flatten)]
    session: &'a SessionSnapshot,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    #[serde(flatten)]
    session: SessionSnapshot,
}

/// Written in place of a stored session whose deletion failed.
#[derive(Serialize, Deserialize)]
struct Tombstone {
    version: u32,
    id: String,
    deleted: bool,
}

/// Encode a session snapshot.
pub fn encode(snapshot: &SessionSnapshot) -> Result<Vec<u8>> {
    let envelope = EnvelopeRef {
        version: FORMAT_VERSION,
        session: snapshot,
    };
    serde_json::to_vec(&envelope)
        .map_err(|e| Error::Serialization(format!("cannot encode session {}: {e}", snapshot.id)))
}

/// Encode a marker recording that the session `id` was deleted.
///
/// A marker never decodes as a session, so a restarted process cannot
/// bring the session back while the stored copy lingers.
pub fn encode_tombstone(id: &str) -> Result<Vec<u8>> {
    let marker = Tombstone {
        version: FORMAT_VERSION,
        id: id.to_string(),
        deleted: true,
    };
    serde_json::to_vec(&marker)
        .map_err(|e| Error::Serialization(format!("cannot encode deletion marker for {id}: {e}")))
}

/// Whether `bytes` is a deletion marker rather than a session.
pub fn is_tombstone(bytes: &[u8]) -> bool {
    serde_json::from_slice::<Tombstone>(bytes).is_ok_and(|marker| marker.deleted)
}

/// Decode a session snapshot.
pub fn decode(bytes: &[u8]) -> Result<SessionSnapshot> {
    if is_tombstone(bytes) {
        return Err(Error::Serialization("stored session was deleted".to_string()));
    }
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| Error::Serialization(format!("cannot decode stored session: {e}")))?;
    if envelope.version != FORMAT_VERSION {
        return Err(Error::Serialization(format!(
            "stored session {} has unsupported format version {}",
            envelope.session.id, envelope.version
        )));
    }
    Ok(envelope.session)
}
