//! Config file discovery.
//!
//! Resolution order (first match wins):
//! 1. An explicit path (from `--config`)
//! 2. `DROWSE_CONFIG` environment variable
//! 3. `./drowse.toml` (project-local)
//! 4. Built-in defaults

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{ConfigError, DrowseConfig, Result};

/// Default config filename for project-local config.
pub const PROJECT_CONFIG_FILE: &str = "drowse.toml";

/// Environment variable naming a config file.
const CONFIG_ENV_VAR: &str = "DROWSE_CONFIG";

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The configuration.
    pub config: DrowseConfig,
    /// File it was loaded from, or `None` for built-in defaults.
    pub source: Option<PathBuf>,
}

/// Load configuration, discovering the file if none is given.
///
/// An explicit path, or one named by `DROWSE_CONFIG`, must exist. The
/// project-local file is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let required = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));

    if let Some(path) = required {
        let config = load_config_file(&path)?;
        return Ok(LoadedConfig {
            config,
            source: Some(path),
        });
    }

    let project = PathBuf::from(PROJECT_CONFIG_FILE);
    if project.is_file() {
        let config = load_config_file(&project)?;
        return Ok(LoadedConfig {
            config,
            source: Some(project),
        });
    }

    debug!("No config file found, using defaults");
    Ok(LoadedConfig {
        config: DrowseConfig::default(),
        source: None,
    })
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<DrowseConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    let config = DrowseConfig::from_toml(&contents)?;
    debug!(path = %path.display(), "Loaded config file");
    Ok(config)
}
