//! The resource-group tree: admission, eligibility, dispatch, refresh.
//!
//! Groups form a tree. Internal groups only aggregate limits and counters;
//! leaves hold the actual queries. Every state transition maintains the
//! tree-wide aggregates in O(depth):
//!
//! - `descendant_running_queries` / `descendant_queued_queries` cache the
//!   subtree sums so admission checks never walk children.
//! - `eligible_sub_groups` orders the children that could start a query right
//!   now; dispatch pops the head and re-appends still-eligible children at
//!   the tail, which yields round-robin fairness among siblings.
//! - `dirty_sub_groups` marks children with running work so the memory
//!   refresh skips idle subtrees.
//!
//! # Locking
//!
//! One `parking_lot::Mutex` per tree guards every node. Cross-node
//! invariants span the whole ancestor spine, so finer-grained locking would
//! buy nothing but lock-ordering hazards; admission is not on the execution
//! hot path. All private helpers take `&mut TreeState`, which can only be
//! reached through the guard.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use kestrel_common::{GroupLimits, KestrelError, KestrelResult, QueryId, ResourceGroupId};

use crate::query::{Executor, QueryExecution};
use crate::queue::LinkedQueue;
use crate::stats::GroupInfo;

/// Arena index of a group node. Nodes are never removed, so indices stay
/// valid for the life of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct GroupIndex(usize);

const ROOT: GroupIndex = GroupIndex(0);

struct GroupNode {
    id: ResourceGroupId,
    parent: Option<GroupIndex>,
    sub_groups: HashMap<String, GroupIndex>,
    limits: GroupLimits,
    descendant_running_queries: usize,
    descendant_queued_queries: usize,
    cached_memory_usage_bytes: u64,
    queued_queries: LinkedQueue<QueryId, Arc<dyn QueryExecution>>,
    running_queries: HashMap<QueryId, Arc<dyn QueryExecution>>,
    eligible_sub_groups: LinkedQueue<GroupIndex>,
    dirty_sub_groups: HashSet<GroupIndex>,
}

impl GroupNode {
    fn new(id: ResourceGroupId, parent: Option<GroupIndex>, limits: GroupLimits) -> Self {
        Self {
            id,
            parent,
            sub_groups: HashMap::new(),
            limits,
            descendant_running_queries: 0,
            descendant_queued_queries: 0,
            cached_memory_usage_bytes: 0,
            queued_queries: LinkedQueue::new(),
            running_queries: HashMap::new(),
            eligible_sub_groups: LinkedQueue::new(),
            dirty_sub_groups: HashSet::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.sub_groups.is_empty()
    }

    /// A zero limit means "closed"; the memory bound uses the cached usage
    /// from the last refresh, which is what makes it soft.
    fn can_run_more(&self) -> bool {
        self.running_queries.len() + self.descendant_running_queries
            < self.limits.max_running_queries
            && self.cached_memory_usage_bytes < self.limits.soft_memory_limit_bytes
    }

    fn can_queue_more(&self) -> bool {
        self.queued_queries.len() + self.descendant_queued_queries
            < self.limits.max_queued_queries
    }

    /// Whether a dispatch into this subtree would start a query right now.
    fn is_eligible(&self) -> bool {
        self.can_run_more()
            && (!self.queued_queries.is_empty() || !self.eligible_sub_groups.is_empty())
    }

    fn is_dirty(&self) -> bool {
        self.running_queries.len() + self.descendant_running_queries > 0
    }
}

struct TreeState {
    nodes: Vec<GroupNode>,
}

impl TreeState {
    fn node(&self, index: GroupIndex) -> &GroupNode {
        &self.nodes[index.0]
    }

    fn node_mut(&mut self, index: GroupIndex) -> &mut GroupNode {
        &mut self.nodes[index.0]
    }

    /// Re-derive this node's membership in its parent's eligible queue, and
    /// the same for every ancestor (whose own eligibility depends on it).
    fn update_eligibility(&mut self, start: GroupIndex) {
        let mut index = start;
        while let Some(parent) = self.node(index).parent {
            if self.node(index).is_eligible() {
                self.node_mut(parent).eligible_sub_groups.push(index);
            } else {
                self.node_mut(parent).eligible_sub_groups.remove(&index);
            }
            index = parent;
        }
    }

    fn enqueue_query(&mut self, leaf: GroupIndex, query: Arc<dyn QueryExecution>) {
        let query_id = query.query_id();
        self.node_mut(leaf).queued_queries.insert(query_id, query);
        let mut index = leaf;
        while let Some(parent) = self.node(index).parent {
            self.node_mut(parent).descendant_queued_queries += 1;
            index = parent;
        }
        self.update_eligibility(leaf);
        tracing::debug!(query = %query_id, group = %self.node(leaf).id, "query queued");
    }

    fn start_in_background(
        &mut self,
        leaf: GroupIndex,
        query: Arc<dyn QueryExecution>,
        executor: &dyn Executor,
    ) {
        let query_id = query.query_id();
        self.node_mut(leaf)
            .running_queries
            .insert(query_id, Arc::clone(&query));
        let mut index = leaf;
        while let Some(parent) = self.node(index).parent {
            let parent_node = self.node_mut(parent);
            parent_node.descendant_running_queries += 1;
            parent_node.dirty_sub_groups.insert(index);
            index = parent;
        }
        self.update_eligibility(leaf);
        tracing::debug!(query = %query_id, group = %self.node(leaf).id, "query started");
        executor.execute(Box::new(move || query.start()));
    }

    /// Terminal-state cleanup. Idempotent: a query that was already removed
    /// (duplicate listener delivery, or the already-terminal race in `add`)
    /// is left alone.
    fn query_finished(&mut self, leaf: GroupIndex, query_id: QueryId) {
        if self.node_mut(leaf).running_queries.remove(&query_id).is_some() {
            let mut index = leaf;
            while let Some(parent) = self.node(index).parent {
                self.node_mut(parent).descendant_running_queries -= 1;
                index = parent;
            }
        } else if self.node_mut(leaf).queued_queries.remove(&query_id).is_some() {
            let mut index = leaf;
            while let Some(parent) = self.node(index).parent {
                self.node_mut(parent).descendant_queued_queries -= 1;
                index = parent;
            }
        } else {
            return;
        }
        self.update_eligibility(leaf);
        tracing::debug!(query = %query_id, group = %self.node(leaf).id, "query released");
    }

    /// Re-read memory reservations, pruning via the dirty sets: only
    /// subtrees that had running work since the last refresh are visited.
    /// Stale contributions of a child are swapped out for fresh ones so the
    /// internal sums never need a full re-walk.
    fn refresh_stats(&mut self, index: GroupIndex) {
        if self.node(index).is_leaf() {
            let total = self
                .node(index)
                .running_queries
                .values()
                .map(|query| query.total_memory_reservation())
                .sum();
            self.node_mut(index).cached_memory_usage_bytes = total;
            return;
        }
        let dirty: Vec<GroupIndex> = self.node(index).dirty_sub_groups.iter().copied().collect();
        for child in dirty {
            let stale = self.node(child).cached_memory_usage_bytes;
            self.node_mut(index).cached_memory_usage_bytes -= stale;
            self.refresh_stats(child);
            let fresh = self.node(child).cached_memory_usage_bytes;
            self.node_mut(index).cached_memory_usage_bytes += fresh;
            if !self.node(child).is_dirty() {
                self.node_mut(index).dirty_sub_groups.remove(&child);
            }
        }
    }

    /// Start one query somewhere in this subtree if limits allow. Returns
    /// whether a query was started.
    fn start_next(&mut self, index: GroupIndex, executor: &dyn Executor) -> KestrelResult<bool> {
        if !self.node(index).can_run_more() {
            return Ok(false);
        }
        if let Some((_, query)) = self.node_mut(index).queued_queries.poll() {
            self.start_in_background(index, query, executor);
            return Ok(true);
        }
        // Pop the child even if it has more work, so it re-enters at the
        // tail and its siblings are served first next round.
        let Some(child) = self.node_mut(index).eligible_sub_groups.pop() else {
            return Ok(false);
        };
        let started = self.start_next(child, executor)?;
        if !started {
            return Err(KestrelError::invariant(
                "eligible-subtree-empty",
                format!(
                    "eligible sub-group '{}' had no queries to run",
                    self.node(child).id
                ),
            ));
        }
        self.node_mut(index).descendant_queued_queries -= 1;
        // The start path already re-derived eligibility along the whole
        // spine; only the round-robin re-queue is left to do here.
        if self.node(child).is_eligible() {
            self.node_mut(index).eligible_sub_groups.push(child);
        }
        Ok(true)
    }

    fn build_info(&self, index: GroupIndex) -> GroupInfo {
        let node = self.node(index);
        let mut names: Vec<&String> = node.sub_groups.keys().collect();
        names.sort();
        let sub_groups = names
            .iter()
            .map(|name| self.build_info(node.sub_groups[*name]))
            .collect();
        GroupInfo {
            id: node.id.clone(),
            limits: node.limits,
            running_queries: node.running_queries.len(),
            queued_queries: node.queued_queries.len(),
            descendant_running_queries: node.descendant_running_queries,
            descendant_queued_queries: node.descendant_queued_queries,
            cached_memory_usage_bytes: node.cached_memory_usage_bytes,
            eligible_sub_groups: node.eligible_sub_groups.len(),
            dirty_sub_groups: node.dirty_sub_groups.len(),
            sub_groups,
        }
    }

    /// Recompute the aggregate identities bottom-up and compare against the
    /// cached values. Returns the subtree's (running, queued) totals.
    fn verify_node(&self, index: GroupIndex) -> KestrelResult<(usize, usize)> {
        let node = self.node(index);
        if !node.sub_groups.is_empty()
            && (!node.queued_queries.is_empty() || !node.running_queries.is_empty())
        {
            return Err(KestrelError::invariant(
                "shape",
                format!("group '{}' holds both sub-groups and queries", node.id),
            ));
        }
        let mut running_sum = 0;
        let mut queued_sum = 0;
        for &child in node.sub_groups.values() {
            let (running, queued) = self.verify_node(child)?;
            running_sum += running;
            queued_sum += queued;
            let child_node = self.node(child);
            if node.eligible_sub_groups.contains(&child) != child_node.is_eligible() {
                return Err(KestrelError::invariant(
                    "eligibility-membership",
                    format!(
                        "group '{}' eligibility queue disagrees with '{}'",
                        node.id, child_node.id
                    ),
                ));
            }
            if child_node.is_dirty() && !node.dirty_sub_groups.contains(&child) {
                return Err(KestrelError::invariant(
                    "dirty-membership",
                    format!(
                        "group '{}' has running work but is not marked dirty in '{}'",
                        child_node.id, node.id
                    ),
                ));
            }
        }
        if node.descendant_running_queries != running_sum {
            return Err(KestrelError::invariant(
                "counter-running",
                format!(
                    "group '{}' caches {} descendant running queries, recount found {}",
                    node.id, node.descendant_running_queries, running_sum
                ),
            ));
        }
        if node.descendant_queued_queries != queued_sum {
            return Err(KestrelError::invariant(
                "counter-queued",
                format!(
                    "group '{}' caches {} descendant queued queries, recount found {}",
                    node.id, node.descendant_queued_queries, queued_sum
                ),
            ));
        }
        if node.running_queries.len() + node.descendant_running_queries
            > node.limits.max_running_queries
        {
            return Err(KestrelError::invariant(
                "limit-running",
                format!(
                    "group '{}' runs {} queries over its limit of {}",
                    node.id,
                    node.running_queries.len() + node.descendant_running_queries,
                    node.limits.max_running_queries
                ),
            ));
        }
        if node.queued_queries.len() + node.descendant_queued_queries
            > node.limits.max_queued_queries
        {
            return Err(KestrelError::invariant(
                "limit-queued",
                format!(
                    "group '{}' queues {} queries over its limit of {}",
                    node.id,
                    node.queued_queries.len() + node.descendant_queued_queries,
                    node.limits.max_queued_queries
                ),
            ));
        }
        Ok((
            running_sum + node.running_queries.len(),
            queued_sum + node.queued_queries.len(),
        ))
    }
}

/// One admission tree. The tree owns every group node and the single lock
/// that guards them; it is also the anchor the driver ticks.
pub struct ResourceGroupTree {
    state: Mutex<TreeState>,
    executor: Arc<dyn Executor>,
    root_id: ResourceGroupId,
}

impl ResourceGroupTree {
    /// Create a tree whose root group carries the given limits.
    pub fn new(
        name: &str,
        limits: GroupLimits,
        executor: Arc<dyn Executor>,
    ) -> KestrelResult<Arc<Self>> {
        let root_id = ResourceGroupId::new(name)?;
        tracing::info!(group = %root_id, ?limits, "resource group tree created");
        Ok(Arc::new(Self {
            state: Mutex::new(TreeState {
                nodes: vec![GroupNode::new(root_id.clone(), None, limits)],
            }),
            executor,
            root_id,
        }))
    }

    /// Handle to the root group.
    pub fn root(self: &Arc<Self>) -> ResourceGroup {
        ResourceGroup {
            tree: Arc::clone(self),
            index: ROOT,
            id: self.root_id.clone(),
        }
    }

    /// Driver tick: refresh memory accounting top-down, then start queued
    /// queries until nothing eligible remains. The tree lock is held for the
    /// whole tick, so concurrent ticks serialize rather than interleave.
    pub fn process_queued_queries(&self) -> KestrelResult<()> {
        let mut state = self.state.lock();
        state.refresh_stats(ROOT);
        let mut started = 0u64;
        while state.start_next(ROOT, self.executor.as_ref())? {
            started += 1;
        }
        if started > 0 {
            tracing::debug!(started, group = %self.root_id, "driver tick promoted queued queries");
        }
        Ok(())
    }

    /// Snapshot of the whole tree.
    pub fn info(&self) -> GroupInfo {
        self.state.lock().build_info(ROOT)
    }

    /// Recount every aggregate and membership set from scratch and compare
    /// against the cached values. Intended for tests and debugging; note
    /// that usage above a limit is reported even though it can legitimately
    /// occur right after a limit was lowered below current usage.
    pub fn verify_invariants(&self) -> KestrelResult<()> {
        self.state.lock().verify_node(ROOT).map(|_| ())
    }

    fn finish_query(&self, index: GroupIndex, query_id: QueryId) {
        self.state.lock().query_finished(index, query_id);
    }
}

impl fmt::Debug for ResourceGroupTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGroupTree")
            .field("root", &self.root_id)
            .finish()
    }
}

/// Cheap cloneable handle to one group in a tree.
#[derive(Clone)]
pub struct ResourceGroup {
    tree: Arc<ResourceGroupTree>,
    index: GroupIndex,
    id: ResourceGroupId,
}

impl ResourceGroup {
    pub fn id(&self) -> &ResourceGroupId {
        &self.id
    }

    pub fn is_root(&self) -> bool {
        self.id.is_root()
    }

    /// Create a child group, or return the existing one with that name. An
    /// existing child keeps its configured limits; reconfiguration goes
    /// through the setters.
    ///
    /// Fails with `GroupNotEmpty` while this group holds queries: a leaf
    /// only becomes an internal group when nothing is running or waiting in
    /// it.
    pub fn get_or_create_sub_group(
        &self,
        name: &str,
        limits: GroupLimits,
    ) -> KestrelResult<ResourceGroup> {
        let child_id = self.id.child(name)?;
        let mut state = self.tree.state.lock();
        let node = state.node(self.index);
        if !node.running_queries.is_empty() || !node.queued_queries.is_empty() {
            return Err(KestrelError::GroupNotEmpty {
                group: self.id.clone(),
            });
        }
        if let Some(&existing) = node.sub_groups.get(name) {
            return Ok(ResourceGroup {
                tree: Arc::clone(&self.tree),
                index: existing,
                id: child_id,
            });
        }
        let index = GroupIndex(state.nodes.len());
        state
            .nodes
            .push(GroupNode::new(child_id.clone(), Some(self.index), limits));
        state
            .node_mut(self.index)
            .sub_groups
            .insert(name.to_string(), index);
        tracing::info!(group = %child_id, ?limits, "sub-group created");
        Ok(ResourceGroup {
            tree: Arc::clone(&self.tree),
            index,
            id: child_id,
        })
    }

    /// Admit a query to this leaf group.
    ///
    /// Returns `Ok(true)` if the query was started or queued, `Ok(false)` if
    /// every admission path is closed (the caller surfaces that as "too many
    /// queued queries"). Fails with `NotLeaf` on a group that has sub-groups.
    pub fn add(&self, query: Arc<dyn QueryExecution>) -> KestrelResult<bool> {
        let query_id = query.query_id();
        let mut state = self.tree.state.lock();
        if !state.node(self.index).is_leaf() {
            return Err(KestrelError::NotLeaf {
                group: self.id.clone(),
            });
        }
        // A saturated ancestor gates every descendant, so both verdicts are
        // the conjunction over the whole spine.
        let mut can_queue = true;
        let mut can_run = true;
        let mut cursor = Some(self.index);
        while let Some(index) = cursor {
            let node = state.node(index);
            can_queue &= node.can_queue_more();
            can_run &= node.can_run_more();
            cursor = node.parent;
        }
        if !can_queue && !can_run {
            tracing::debug!(query = %query_id, group = %self.id, "admission rejected");
            return Ok(false);
        }
        if can_run {
            state.start_in_background(self.index, Arc::clone(&query), self.tree.executor.as_ref());
        } else {
            state.enqueue_query(self.index, Arc::clone(&query));
        }
        let tree = Arc::downgrade(&self.tree);
        let index = self.index;
        query.add_state_change_listener(Box::new(move |query_state| {
            if query_state.is_done() {
                if let Some(tree) = tree.upgrade() {
                    tree.finish_query(index, query_id);
                }
            }
        }));
        // The query may have reached a terminal state before the listener
        // existed; clean up through the guard-held path in that case.
        if query.state().is_done() {
            state.query_finished(self.index, query_id);
        }
        Ok(true)
    }

    pub fn set_max_running_queries(&self, max_running_queries: usize) {
        let mut state = self.tree.state.lock();
        let node = state.node_mut(self.index);
        let could_run = node.can_run_more();
        node.limits.max_running_queries = max_running_queries;
        if node.can_run_more() != could_run {
            state.update_eligibility(self.index);
        }
    }

    pub fn set_max_queued_queries(&self, max_queued_queries: usize) {
        let mut state = self.tree.state.lock();
        state.node_mut(self.index).limits.max_queued_queries = max_queued_queries;
    }

    pub fn set_soft_memory_limit_bytes(&self, soft_memory_limit_bytes: u64) {
        let mut state = self.tree.state.lock();
        let node = state.node_mut(self.index);
        let could_run = node.can_run_more();
        node.limits.soft_memory_limit_bytes = soft_memory_limit_bytes;
        if node.can_run_more() != could_run {
            state.update_eligibility(self.index);
        }
    }

    pub fn limits(&self) -> GroupLimits {
        self.tree.state.lock().node(self.index).limits
    }

    /// Snapshot of this group and its subtree.
    pub fn info(&self) -> GroupInfo {
        self.tree.state.lock().build_info(self.index)
    }
}

impl PartialEq for ResourceGroup {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ResourceGroup {}

impl fmt::Debug for ResourceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGroup").field("id", &self.id).finish()
    }
}

impl fmt::Display for ResourceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
