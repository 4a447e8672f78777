//! Bounded retry of failed iterations.

use crate::config::{ConfigKey, ConfigRegistry};
use crate::error::Result;

/// Attempts per iteration when retry is enabled: the first run plus one retry.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Whether and how often a failed iteration is re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Reads the `retry` flag.
    pub fn from_config(config: &ConfigRegistry) -> Result<Self> {
        Ok(Self::new(config.flag(ConfigKey::Retry)?))
    }

    pub fn controller(&self) -> RetryController {
        RetryController {
            policy: *self,
            attempts: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Attempt counter of the iteration a worker is running.
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryController {
    /// Starts counting a new iteration.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Registers an attempt and returns its one-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// After a failed attempt: whether another attempt is allowed.
    pub fn should_retry(&self, retryable: bool) -> bool {
        self.policy.enabled && retryable && self.attempts < self.policy.max_attempts
    }
}
