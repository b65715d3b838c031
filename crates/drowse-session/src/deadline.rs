//! Inactivity deadlines for expiry and idling.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::elapsed;
use crate::record::SessionState;

/// Action a sweep owes a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Due {
    /// Inactive past its expiry limit.
    Expire,
    /// Inactive past the idle-save period.
    Idle,
}

/// Inactivity limits applied to one session.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    /// Expiry limit. Zero means never.
    pub max_inactive: Duration,
    /// Idle-save period. Zero disables idling.
    pub idle_after: Duration,
}

impl Deadlines {
    /// Decide what, if anything, is due for a session.
    ///
    /// Expiry is checked first and wins over idling when both are due.
    pub fn evaluate(
        &self,
        now: DateTime<Utc>,
        last_accessed: DateTime<Utc>,
        state: SessionState,
    ) -> Option<Due> {
        if state == SessionState::Invalid {
            return None;
        }

        let inactive = elapsed(now, last_accessed);
        if self.is_expired(inactive) {
            return Some(Due::Expire);
        }
        if state == SessionState::Active && !self.idle_after.is_zero() && inactive >= self.idle_after
        {
            return Some(Due::Idle);
        }
        None
    }

    /// Whether an inactivity span exceeds the expiry limit.
    pub fn is_expired(&self, inactive: Duration) -> bool {
        !self.max_inactive.is_zero() && inactive >= self.max_inactive
    }
}
