//! Engine configuration.
//!
//! Loaded by the host (the server reads it from the environment with the
//! `config` crate). Every field has a default so an empty source is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Iteration bound for `loop` nodes without `maxIterations`.
    #[serde(default = "default_loop_bound")]
    pub default_loop_bound: u64,

    /// Node visits allowed per session before it fails with
    /// `LoopBoundExceeded`. Catches cycles that do not go through a loop node.
    #[serde(default = "default_max_steps_per_session")]
    pub max_steps_per_session: u64,

    /// How long an in-flight handler may keep running after cancellation.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    /// Deadline for I/O nodes without a `timeout`.
    #[serde(default = "default_io_timeout_ms")]
    pub default_io_timeout_ms: u64,

    /// Initial retry backoff for I/O nodes without `retryBackoff`.
    #[serde(default = "default_retry_backoff_ms")]
    pub default_retry_backoff_ms: u64,

    /// Upper bound for a single backoff delay.
    #[serde(default = "default_max_retry_backoff_ms")]
    pub max_retry_backoff_ms: u64,

    /// What the caller hears when a session fails.
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

fn default_loop_bound() -> u64 {
    10
}

fn default_max_steps_per_session() -> u64 {
    1000
}

fn default_cancel_grace_ms() -> u64 {
    2000
}

fn default_io_timeout_ms() -> u64 {
    10_000
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_max_retry_backoff_ms() -> u64 {
    10_000
}

fn default_fallback_message() -> String {
    "We're sorry, something went wrong. Goodbye.".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_loop_bound: default_loop_bound(),
            max_steps_per_session: default_max_steps_per_session(),
            cancel_grace_ms: default_cancel_grace_ms(),
            default_io_timeout_ms: default_io_timeout_ms(),
            default_retry_backoff_ms: default_retry_backoff_ms(),
            max_retry_backoff_ms: default_max_retry_backoff_ms(),
            fallback_message: default_fallback_message(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    #[must_use]
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.default_io_timeout_ms)
    }

    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.default_retry_backoff_ms)
    }

    #[must_use]
    pub fn max_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.max_retry_backoff_ms)
    }
}
