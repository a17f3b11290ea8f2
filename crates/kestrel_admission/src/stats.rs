//! Observability snapshots of the group tree.

use serde::Serialize;

use kestrel_common::{GroupLimits, ResourceGroupId};

/// Point-in-time view of one group and its subtree, taken under the tree
/// lock. Sub-groups are sorted by name for stable output.
#[derive(Debug, Clone, Serialize)]
pub struct GroupInfo {
    pub id: ResourceGroupId,
    pub limits: GroupLimits,
    /// Queries running in this group (non-zero only at leaves).
    pub running_queries: usize,
    /// Queries waiting in this group (non-zero only at leaves).
    pub queued_queries: usize,
    pub descendant_running_queries: usize,
    pub descendant_queued_queries: usize,
    /// Subtree memory reservation as of the last driver refresh.
    pub cached_memory_usage_bytes: u64,
    pub eligible_sub_groups: usize,
    pub dirty_sub_groups: usize,
    pub sub_groups: Vec<GroupInfo>,
}

impl GroupInfo {
    /// Running queries in this group plus all descendants.
    pub fn total_running_queries(&self) -> usize {
        self.running_queries + self.descendant_running_queries
    }

    /// Queued queries in this group plus all descendants.
    pub fn total_queued_queries(&self) -> usize {
        self.queued_queries + self.descendant_queued_queries
    }

    /// Look up a descendant snapshot by dotted path relative to this group.
    pub fn descendant(&self, path: &str) -> Option<&GroupInfo> {
        let mut current = self;
        for segment in path.split('.') {
            current = current
                .sub_groups
                .iter()
                .find(|info| info.id.name() == segment)?;
        }
        Some(current)
    }
}
