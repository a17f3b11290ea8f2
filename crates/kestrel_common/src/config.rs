//! Configuration types embeddable in the coordinator's config file.

use serde::{Deserialize, Serialize};

/// Per-group admission limits.
///
/// A zero limit closes the corresponding gate: `max_running_queries: 0` means
/// nothing starts here, `max_queued_queries: 0` means nothing waits here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLimits {
    /// Maximum queries running at once anywhere in this group's subtree.
    pub max_running_queries: usize,
    /// Maximum queries waiting anywhere in this group's subtree.
    pub max_queued_queries: usize,
    /// Advisory cap on the subtree's memory reservation in bytes. Gates
    /// admission once the cached usage reaches it; never kills a query.
    pub soft_memory_limit_bytes: u64,
}

impl Default for GroupLimits {
    fn default() -> Self {
        Self {
            max_running_queries: 100,
            max_queued_queries: 1_000,
            soft_memory_limit_bytes: 4 * 1024 * 1024 * 1024, // 4GB
        }
    }
}

impl GroupLimits {
    pub fn new(
        max_running_queries: usize,
        max_queued_queries: usize,
        soft_memory_limit_bytes: u64,
    ) -> Self {
        Self {
            max_running_queries,
            max_queued_queries,
            soft_memory_limit_bytes,
        }
    }

    /// Limits that admit nothing. Useful as a placeholder for groups that are
    /// opened later via the setters.
    pub fn closed() -> Self {
        Self {
            max_running_queries: 0,
            max_queued_queries: 0,
            soft_memory_limit_bytes: 0,
        }
    }
}

/// Scheduler driver section in the coordinator config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Spawn the background driver thread (default: true).
    pub enabled: bool,
    /// Interval between driver ticks in milliseconds (default: 100).
    pub tick_interval_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: 100,
        }
    }
}
