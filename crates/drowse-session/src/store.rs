//! Durable storage for idled sessions.
//!
//! The manager talks to storage through the [`SessionStore`] trait so the
//! engine stays decoupled from where blobs live. [`FileStore`] keeps one
//! file per session in a directory; [`MemoryStore`] keeps blobs in a map.

use std::collections::HashMap;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::RetryPolicy;
use crate::error::{Error, Result};

/// File extension of stored sessions.
pub const SESSION_FILE_EXTENSION: &str = "session";

/// Number of lock stripes serializing per-id file operations.
const LOCK_STRIPES: usize = 64;

/// Key-value storage for encoded sessions, keyed by session id.
pub trait SessionStore: Send + Sync + 'static {
    /// Publish a blob for `id`, replacing any previous one.
    ///
    /// Readers must never observe a partially written blob.
    fn save(&self, id: &str, blob: &[u8]) -> Result<()>;

    /// Load the blob for `id`. `Ok(None)` if there is none.
    fn load(&self, id: &str) -> Result<Option<Vec<u8>>>;

    /// Delete the blob for `id`. Deleting a missing blob succeeds.
    fn delete(&self, id: &str) -> Result<()>;

    /// Ids of all stored blobs.
    fn ids(&self) -> Result<Vec<String>>;

    /// Whether a blob exists for `id`.
    fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.load(id)?.is_some())
    }
}

/// Directory-backed store: one file per session id.
///
/// Files are published by writing a temporary file and renaming it into
/// place. Operations on the same id are serialized; different ids only
/// contend when they hash to the same lock stripe.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    retry: RetryPolicy,
    stripes: Vec<Mutex<()>>,
}

impl FileStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            dir: dir.into(),
            retry,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// The backing directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `id`.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(file_name_for(id))
    }

    fn stripe(&self, id: &str) -> &Mutex<()> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        id.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }

    fn write_atomic(&self, path: &Path, blob: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let tmp = self.dir.join(format!(
            ".{}.{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("session"),
            uuid::Uuid::new_v4().simple()
        ));

        let written = (|| -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(blob)?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        })();

        if written.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        written
    }
}

impl SessionStore for FileStore {
    fn save(&self, id: &str, blob: &[u8]) -> Result<()> {
        let _guard = self.stripe(id).lock();
        let path = self.path_for(id);
        self.retry
            .run(|| self.write_atomic(&path, blob))
            .map_err(|e| Error::store(id, e))?;
        debug!(session_id = %id, bytes = blob.len(), "Session saved to store");
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let _guard = self.stripe(id).lock();
        let path = self.path_for(id);
        match self.retry.run(|| fs::read(&path)) {
            Ok(bytes) => {
                trace!(session_id = %id, bytes = bytes.len(), "Session loaded from store");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::store(id, e)),
        }
    }

    fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.stripe(id).lock();
        let path = self.path_for(id);
        match self.retry.run(|| fs::remove_file(&path)) {
            Ok(()) => {
                debug!(session_id = %id, "Session deleted from store");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::store(id, e)),
        }
    }

    fn ids(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::StoreIo {
                    context: self.dir.display().to_string(),
                    source: e,
                });
            }
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::StoreIo {
                context: self.dir.display().to_string(),
                source: e,
            })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match id_for_file_name(name) {
                Some(id) => ids.push(id),
                None if !name.starts_with('.') => {
                    warn!(file = %name, "Ignoring unrecognised file in session store");
                }
                None => {}
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn contains(&self, id: &str) -> Result<bool> {
        let _guard = self.stripe(id).lock();
        let path = self.path_for(id);
        match self.retry.run(|| fs::metadata(&path)) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::store(id, e)),
        }
    }
}

/// In-memory store, for embedding without a filesystem and for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

impl SessionStore for MemoryStore {
    fn save(&self, id: &str, blob: &[u8]) -> Result<()> {
        self.blobs.lock().insert(id.to_string(), blob.to_vec());
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(id).cloned())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.blobs.lock().remove(id);
        Ok(())
    }

    fn ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.blobs.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.blobs.lock().contains_key(id))
    }
}

/// File name for a session id.
///
/// Unreserved characters pass through; every other byte, including `%`,
/// is percent-encoded, so distinct ids never share a file.
pub fn file_name_for(id: &str) -> String {
    let mut name = String::with_capacity(id.len() + SESSION_FILE_EXTENSION.len() + 1);
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            name.push(byte as char);
        } else {
            name.push_str(&format!("%{byte:02X}"));
        }
    }
    name.push('.');
    name.push_str(SESSION_FILE_EXTENSION);
    name
}

/// Session id for a file name, if it names a stored session.
pub fn id_for_file_name(name: &str) -> Option<String> {
    let stem = name.strip_suffix(SESSION_FILE_EXTENSION)?.strip_suffix('.')?;
    if stem.is_empty() || stem.starts_with('.') {
        return None;
    }

    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = stem.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' => {
                out.push(b);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}
