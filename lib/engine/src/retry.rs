//! Deadline and retry policy for node execution.
//!
//! I/O nodes read `timeout` (ms), `retries`, and `retryBackoff` (ms) from
//! their configuration, with engine defaults for anything unset. Local
//! nodes run once and without a deadline.

use crate::config::EngineConfig;
use callflow_workflow::{NodeTypeDefinition, WorkflowNode};
use std::time::Duration;

/// How a node visit is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deadline per attempt. `None` means unbounded.
    pub timeout: Option<Duration>,
    /// Extra attempts after the first.
    pub retries: u32,
    /// Delay before the first retry. Doubles for each further retry.
    pub backoff: Duration,
    /// Upper bound for a single delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A single attempt without a deadline.
    #[must_use]
    pub const fn once() -> Self {
        Self {
            timeout: None,
            retries: 0,
            backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Builds the policy for a node.
    #[must_use]
    pub fn for_node(
        node: &WorkflowNode,
        definition: &NodeTypeDefinition,
        config: &EngineConfig,
    ) -> Self {
        if !definition.performs_io {
            return Self::once();
        }
        let timeout = node
            .config
            .duration("timeout")
            .filter(|t| !t.is_zero())
            .unwrap_or_else(|| config.io_timeout());
        let retries = node
            .config
            .u64("retries")
            .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX));
        let backoff = node
            .config
            .duration("retryBackoff")
            .unwrap_or_else(|| config.retry_backoff());
        Self {
            timeout: Some(timeout),
            retries,
            backoff,
            max_backoff: config.max_retry_backoff(),
        }
    }

    /// Total attempts allowed.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay before attempt `attempt + 1`, where `attempt` is the 1-based
    /// attempt that just failed.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }
}
