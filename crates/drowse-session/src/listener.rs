//! Hooks for observing session lifecycle events.

/// Observer of session lifecycle events.
///
/// Every method has a no-op default; implement only the events you need.
/// Callbacks receive the session id and may run while that session's lock
/// is held, so they must not call back into the same session.
pub trait SessionListener: Send + Sync {
    /// A new session was created.
    fn session_created(&self, _id: &str) {}

    /// A session was expired or invalidated.
    fn session_destroyed(&self, _id: &str) {}

    /// A session's attributes were passivated to the store.
    fn session_idled(&self, _id: &str) {}

    /// An idled session was reloaded from the store.
    fn session_restored(&self, _id: &str) {}
}
