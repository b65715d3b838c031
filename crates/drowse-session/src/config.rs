//! Configuration for the session manager.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default inactivity limit before a session expires (30 minutes).
pub const DEFAULT_MAX_INACTIVE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Default period between scavenger sweeps.
pub const DEFAULT_SCAVENGE_PERIOD: Duration = Duration::from_secs(60);

/// Default idle-save period (zero: idling disabled).
pub const DEFAULT_IDLE_SAVE_PERIOD: Duration = Duration::ZERO;

/// Default directory for idled sessions.
pub const DEFAULT_STORE_DIRECTORY: &str = "sessions";

/// Bounded retry policy for durable store I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts (at least one is always made).
    pub attempts: u32,

    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Run `op`, retrying failures up to the configured number of attempts.
    ///
    /// `NotFound` is returned immediately; it is an answer, not a fault.
    pub fn run<T>(&self, mut op: impl FnMut() -> std::io::Result<T>) -> std::io::Result<T> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(e),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    tracing::trace!(attempt, error = %e, "Store operation failed, retrying");
                    attempt += 1;
                    if !self.backoff.is_zero() {
                        std::thread::sleep(self.backoff);
                    }
                }
            }
        }
    }
}

/// Configuration for the session manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Inactivity after which a session expires. Zero means never.
    pub max_inactive_interval: Duration,

    /// Time between scavenger sweeps. Must be non-zero to start the scavenger.
    pub scavenge_period: Duration,

    /// Inactivity after which a session is idled to the store. Zero disables idling.
    pub idle_save_period: Duration,

    /// Directory backing the durable store.
    pub store_directory: PathBuf,

    /// Idle-save every live session when the manager stops.
    pub save_on_shutdown: bool,

    /// Adopt every stored session as an idled session when the manager starts.
    pub restore_on_start: bool,

    /// Delete stored sessions that cannot be decoded.
    pub delete_unrestorable: bool,

    /// Retry policy for store I/O.
    pub store_retry: RetryPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_inactive_interval: DEFAULT_MAX_INACTIVE_INTERVAL,
            scavenge_period: DEFAULT_SCAVENGE_PERIOD,
            idle_save_period: DEFAULT_IDLE_SAVE_PERIOD,
            store_directory: PathBuf::from(DEFAULT_STORE_DIRECTORY),
            save_on_shutdown: true,
            restore_on_start: false,
            delete_unrestorable: false,
            store_retry: RetryPolicy::default(),
        }
    }
}

impl ManagerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from any provider of the core session options.
    pub fn from_session_config<C: HasSessionConfig + ?Sized>(config: &C) -> Self {
        Self {
            max_inactive_interval: config.max_inactive_interval(),
            scavenge_period: config.scavenge_period(),
            idle_save_period: config.idle_save_period(),
            store_directory: config.store_directory().to_path_buf(),
            ..Self::default()
        }
    }

    /// Set the inactivity limit before expiry.
    pub fn with_max_inactive_interval(mut self, interval: Duration) -> Self {
        self.max_inactive_interval = interval;
        self
    }

    /// Set the scavenger period.
    pub fn with_scavenge_period(mut self, period: Duration) -> Self {
        self.scavenge_period = period;
        self
    }

    /// Set the idle-save period (zero disables idling).
    pub fn with_idle_save_period(mut self, period: Duration) -> Self {
        self.idle_save_period = period;
        self
    }

    /// Set the store directory.
    pub fn with_store_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_directory = dir.into();
        self
    }

    /// Enable or disable the shutdown flush.
    pub fn with_save_on_shutdown(mut self, enabled: bool) -> Self {
        self.save_on_shutdown = enabled;
        self
    }

    /// Enable or disable adopting stored sessions at start.
    pub fn with_restore_on_start(mut self, enabled: bool) -> Self {
        self.restore_on_start = enabled;
        self
    }

    /// Enable or disable deletion of undecodable stored sessions.
    pub fn with_delete_unrestorable(mut self, enabled: bool) -> Self {
        self.delete_unrestorable = enabled;
        self
    }

    /// Set the store retry policy.
    pub fn with_store_retry(mut self, retry: RetryPolicy) -> Self {
        self.store_retry = retry;
        self
    }

    /// Whether idling is enabled.
    pub fn idling_enabled(&self) -> bool {
        !self.idle_save_period.is_zero()
    }

    /// Check that the configuration can drive a scavenger.
    pub fn validate(&self) -> Result<()> {
        if self.scavenge_period.is_zero() {
            return Err(Error::Config("scavenge_period must be non-zero".to_string()));
        }
        if self.store_directory.as_os_str().is_empty() {
            return Err(Error::Config("store_directory must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Provider of the recognised session options.
///
/// Lets any configuration source (a TOML file, CLI flags) build a
/// [`ManagerConfig`] without this crate knowing its shape.
pub trait HasSessionConfig {
    /// Inactivity before expiry.
    fn max_inactive_interval(&self) -> Duration;

    /// Time between scavenger sweeps.
    fn scavenge_period(&self) -> Duration;

    /// Inactivity before idling (zero disables).
    fn idle_save_period(&self) -> Duration;

    /// Directory backing the durable store.
    fn store_directory(&self) -> &Path;
}

impl HasSessionConfig for ManagerConfig {
    fn max_inactive_interval(&self) -> Duration {
        self.max_inactive_interval
    }

    fn scavenge_period(&self) -> Duration {
        self.scavenge_period
    }

    fn idle_save_period(&self) -> Duration {
        self.idle_save_period
    }

    fn store_directory(&self) -> &Path {
        &self.store_directory
    }
}
