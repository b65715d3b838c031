//! CLI command handlers.

use std::path::{Path, PathBuf};

use anyhow::Result;

pub mod config;
pub mod sessions;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Explicit config file, if any.
    pub config_path: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Load the configuration this invocation should use.
    pub fn load_config(&self) -> Result<drowse_config::LoadedConfig> {
        Ok(drowse_config::load_config(self.config_path.as_deref())?)
    }

    /// Resolve the store directory: an explicit flag wins over the config file.
    pub fn store_dir(&self, flag: Option<&Path>) -> Result<PathBuf> {
        match flag {
            Some(dir) => Ok(dir.to_path_buf()),
            None => Ok(self.load_config()?.config.session.store_directory),
        }
    }
}
