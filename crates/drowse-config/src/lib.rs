//! Configuration for the drowse session engine.
//!
//! Reads a TOML file with a `[session]` table and turns it into a
//! [`drowse_session::ManagerConfig`]:
//!
//! ```toml
//! [session]
//! max_inactive_interval = 1800
//! scavenge_period = 60
//! idle_save_period = 300
//! store_directory = "/var/lib/app/sessions"
//! ```

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{LoadedConfig, PROJECT_CONFIG_FILE, load_config, load_config_file};
pub use error::{ConfigError, Result};
pub use types::{DrowseConfig, SessionSection};
