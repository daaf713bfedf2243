//! Bounded fixed-delay reconnection policy for the report channel.
//!
//! After an unexpected close the manager asks [`ReconnectPolicy`] whether
//! another attempt is allowed. Attempts are counted per job and reset
//! whenever a channel opens successfully, so the cap applies to
//! consecutive failures only.

use std::time::Duration;

/// Tunable parameters for reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Wait between an unexpected close and the next attempt.
    pub delay: Duration,
    /// Consecutive retries allowed before the session gives up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_attempts: 3,
        }
    }
}

impl ReconnectPolicy {
    /// Attempt number of the next retry, or `None` once `attempts_so_far`
    /// has reached the cap.
    pub fn next_attempt(&self, attempts_so_far: u32) -> Option<u32> {
        (attempts_so_far < self.max_attempts).then_some(attempts_so_far + 1)
    }
}
