//! Configuration types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use drowse_session::config::{
    DEFAULT_IDLE_SAVE_PERIOD, DEFAULT_MAX_INACTIVE_INTERVAL, DEFAULT_SCAVENGE_PERIOD,
    DEFAULT_STORE_DIRECTORY,
};
use drowse_session::{HasSessionConfig, ManagerConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Root configuration file.
///
/// ```toml
/// [session]
/// max_inactive_interval = 1800
/// idle_save_period = 300
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrowseConfig {
    /// Session engine settings.
    pub session: SessionSection,
}

impl DrowseConfig {
    /// Create a config with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Build a validated engine configuration.
    pub fn to_manager_config(&self) -> Result<ManagerConfig> {
        self.session.to_manager_config()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// The `[session]` table. Periods are in whole seconds.
///
/// ```toml
/// [session]
/// max_inactive_interval = 1800   # 0 = never expire
/// scavenge_period = 60
/// idle_save_period = 0           # 0 = idling disabled
/// store_directory = "./sessions"
/// save_on_shutdown = true
/// restore_on_start = false
/// delete_unrestorable = false
/// store_retry_attempts = 3
/// store_retry_backoff_ms = 10
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Seconds of inactivity before a session expires.
    pub max_inactive_interval: u64,
    /// Seconds between scavenger sweeps.
    pub scavenge_period: u64,
    /// Seconds of inactivity before a session is idled to disk.
    pub idle_save_period: u64,
    /// Directory holding idled sessions.
    pub store_directory: PathBuf,
    /// Idle every live session on shutdown.
    pub save_on_shutdown: bool,
    /// Adopt stored sessions on startup.
    pub restore_on_start: bool,
    /// Delete stored sessions that fail to decode.
    pub delete_unrestorable: bool,
    /// Attempts per store operation.
    pub store_retry_attempts: u32,
    /// Pause between store attempts, in milliseconds.
    pub store_retry_backoff_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            max_inactive_interval: DEFAULT_MAX_INACTIVE_INTERVAL.as_secs(),
            scavenge_period: DEFAULT_SCAVENGE_PERIOD.as_secs(),
            idle_save_period: DEFAULT_IDLE_SAVE_PERIOD.as_secs(),
            store_directory: PathBuf::from(".").join(DEFAULT_STORE_DIRECTORY),
            save_on_shutdown: true,
            restore_on_start: false,
            delete_unrestorable: false,
            store_retry_attempts: retry.attempts,
            store_retry_backoff_ms: retry.backoff.as_millis() as u64,
        }
    }
}

impl SessionSection {
    /// Build a validated engine configuration from this section.
    pub fn to_manager_config(&self) -> Result<ManagerConfig> {
        if self.store_retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "store_retry_attempts must be at least 1".to_string(),
            ));
        }

        let config = ManagerConfig::from_session_config(self)
            .with_save_on_shutdown(self.save_on_shutdown)
            .with_restore_on_start(self.restore_on_start)
            .with_delete_unrestorable(self.delete_unrestorable)
            .with_store_retry(RetryPolicy {
                attempts: self.store_retry_attempts,
                backoff: Duration::from_millis(self.store_retry_backoff_ms),
            });
        config
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }
}

impl HasSessionConfig for SessionSection {
    fn max_inactive_interval(&self) -> Duration {
        Duration::from_secs(self.max_inactive_interval)
    }

    fn scavenge_period(&self) -> Duration {
        Duration::from_secs(self.scavenge_period)
    }

    fn idle_save_period(&self) -> Duration {
        Duration::from_secs(self.idle_save_period)
    }

    fn store_directory(&self) -> &Path {
        &self.store_directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DrowseConfig::from_toml("").unwrap();
        assert_eq!(config, DrowseConfig::new());
        assert_eq!(config.session.max_inactive_interval, 1800);
        assert_eq!(config.session.scavenge_period, 60);
        assert_eq!(config.session.idle_save_period, 0);
        assert_eq!(config.session.store_directory, PathBuf::from("./sessions"));
    }

    #[test]
    fn test_parse_session_section() {
        let toml = r#"
[session]
max_inactive_interval = 20
scavenge_period = 1
idle_save_period = 2
store_directory = "/tmp/drowse"
restore_on_start = true
store_retry_backoff_ms = 50
"#;
        let config = DrowseConfig::from_toml(toml).unwrap();
        let manager = config.to_manager_config().unwrap();
        assert_eq!(manager.max_inactive_interval, Duration::from_secs(20));
        assert_eq!(manager.scavenge_period, Duration::from_secs(1));
        assert_eq!(manager.idle_save_period, Duration::from_secs(2));
        assert_eq!(manager.store_directory, PathBuf::from("/tmp/drowse"));
        assert!(manager.restore_on_start);
        assert!(manager.save_on_shutdown);
        assert_eq!(manager.store_retry.attempts, 3);
        assert_eq!(manager.store_retry.backoff, Duration::from_millis(50));
    }

    #[test]
    fn test_zero_scavenge_period_invalid() {
        let config = DrowseConfig::from_toml("[session]\nscavenge_period = 0\n").unwrap();
        assert!(matches!(
            config.to_manager_config(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_retry_attempts_invalid() {
        let config = DrowseConfig::from_toml("[session]\nstore_retry_attempts = 0\n").unwrap();
        let err = config.to_manager_config().unwrap_err();
        assert!(err.to_string().contains("store_retry_attempts"));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let result = DrowseConfig::from_toml("[session]\nidle_save_period = \"soon\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = DrowseConfig::new();
        config.session.idle_save_period = 300;
        let text = config.to_toml().unwrap();
        assert!(text.contains("[session]"));
        assert_eq!(DrowseConfig::from_toml(&text).unwrap(), config);
    }
}
