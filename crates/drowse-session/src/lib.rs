//! Session lifecycle engine for drowse.
//!
//! Sessions live in memory while in use. A background scavenger expires
//! sessions that stay inactive past their limit and, when idling is
//! enabled, passivates quieter sessions to a directory-backed store. The
//! next access reloads an idled session transparently.
//!
//! ```rust,ignore
//! use drowse_session::{ManagerConfig, SessionManager};
//! use std::time::Duration;
//!
//! let manager = SessionManager::new(
//!     ManagerConfig::new()
//!         .with_idle_save_period(Duration::from_secs(300))
//!         .with_store_directory("/var/lib/app/sessions"),
//! );
//! manager.start()?;
//!
//! let session = manager.resolve_session(cookie.as_deref());
//! session.set_attribute("user", "alice")?;
//! ```

pub mod clock;
pub mod codec;
pub mod config;
pub mod deadline;
pub mod error;
pub mod listener;
pub mod manager;
mod record;
mod scavenger;
pub mod store;
mod table;

pub use clock::{Clock, ManualClock, SystemClock, elapsed};
pub use codec::{FORMAT_VERSION, SessionSnapshot, decode, encode, encode_tombstone, is_tombstone};
pub use config::{HasSessionConfig, ManagerConfig, RetryPolicy};
pub use deadline::{Deadlines, Due};
pub use error::{Error, Result};
pub use listener::SessionListener;
pub use manager::{ManagerStats, SessionManager};
pub use record::{Attribute, Session, SessionState};
pub use scavenger::SweepReport;
pub use store::{FileStore, MemoryStore, SessionStore, file_name_for, id_for_file_name};
