//! The commit pass: drain invalidation worklists and rebuild derived arrays.

use std::collections::HashSet;

use crate::arena::NodeId;
use crate::config::OrderPolicy;
use crate::tree::Tree;

/// Nodes visited by a commit.
///
/// An inactive path means "everything may have changed" and is reported after
/// a full reload, where tracking individual branches is pointless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedPath {
    active: bool,
    nodes: HashSet<NodeId>,
}

impl Default for ChangedPath {
    fn default() -> Self {
        Self {
            active: true,
            nodes: HashSet::new(),
        }
    }
}

impl ChangedPath {
    /// A path that reports every node as changed.
    pub fn inactive() -> Self {
        Self {
            active: false,
            nodes: HashSet::new(),
        }
    }

    /// Whether individual nodes are tracked.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether `node` was visited. Always true for an inactive path.
    pub fn is_changed(&self, node: NodeId) -> bool {
        !self.active || self.nodes.contains(&node)
    }

    /// Whether `node` was recorded as visited.
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// Recorded nodes, in no particular order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    /// Number of recorded nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn insert(&mut self, node: NodeId) {
        self.nodes.insert(node);
    }

    pub(crate) fn deactivate(&mut self) {
        self.active = false;
        self.nodes.clear();
    }
}

/// What a commit did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Some `children_after_group` or `all_leaf_children` array was replaced,
    /// or a node was pruned.
    pub structure_changed: bool,
    /// Nodes visited by this commit.
    pub changed_path: ChangedPath,
    /// Parents whose incoming order disagreed with the preserved order.
    pub suppressed_reorders: usize,
    /// Empty nodes removed during the pass.
    pub pruned: usize,
}

impl<D> Tree<D> {
    /// Run one commit pass.
    ///
    /// Worklists are drained depth-first from the root with an explicit stack,
    /// so every queued child is finished before its parent. A finished node is
    /// pruned if it ended up empty; otherwise its primary duplicate is
    /// re-elected and both derived arrays are rebuilt. Returns immediately when
    /// nothing is queued, which makes a second commit a no-op.
    pub(crate) fn commit(&mut self, tree_data: bool, policy: OrderPolicy) -> CommitOutcome {
        let mut outcome = CommitOutcome::default();
        if !self.is_invalidated() {
            return outcome;
        }

        let span = tracing::debug_span!("commit", nodes = self.node_count(), ?policy);
        let _enter = span.enter();

        let root = self.root();
        let mut stack = vec![root];
        while let Some(&top) = stack.last() {
            if let Some(child) = self.dequeue_invalidated(top) {
                stack.push(child);
                continue;
            }
            stack.pop();

            // Parent is still on the stack, so detaching without re-queueing is
            // enough for it to rebuild.
            if top != root && self.nodes[top].is_empty() {
                self.detach_node(top);
                self.free_node(top);
                outcome.pruned += 1;
                outcome.structure_changed = true;
                continue;
            }

            outcome.changed_path.insert(top);
            self.sort_first_duplicate_row(top);
            let update = self.update_children_after_group(top, tree_data, policy);
            if update.suppressed_reorder {
                outcome.suppressed_reorders += 1;
            }
            let leaves_changed = self.update_all_leaf_children(top);
            outcome.structure_changed |= update.changed || leaves_changed;
        }
        self.clear_root_queued();

        tracing::debug!(
            visited = outcome.changed_path.len(),
            pruned = outcome.pruned,
            structure_changed = outcome.structure_changed,
            "commit finished"
        );
        outcome
    }
}
