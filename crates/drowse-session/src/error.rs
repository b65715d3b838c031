//! Error types for session engine operations.

/// Error type for session engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The session is invalid (expired, invalidated) or does not exist.
    #[error("Session is invalid: {0}")]
    InvalidSession(String),

    /// A session could not be encoded to, or decoded from, its durable form.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The durable store failed to read, write or delete.
    #[error("Store I/O error ({context}): {source}")]
    StoreIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The scavenger is already running.
    #[error("Scavenger already running")]
    AlreadyRunning,

    /// The scavenger is not running.
    #[error("Scavenger not running")]
    NotRunning,

    /// The configuration is not usable.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// No async runtime is available to drive the scavenger.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Build a store error for an operation on one session.
    pub(crate) fn store(id: &str, source: std::io::Error) -> Self {
        Error::StoreIo {
            context: format!("session {id}"),
            source,
        }
    }
}

/// Result type for session engine operations.
pub type Result<T> = std::result::Result<T, Error>;
