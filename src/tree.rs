//! The secondary tree: node/row arenas and the per-node operations.
//!
//! Mutations follow a mark/sweep split. Everything that changes a node's
//! occupancy or its children calls [`Tree::invalidate`], which queues the node
//! into its parent's worklist and walks up until it meets an ancestor that is
//! already queued. Nothing derived is recomputed here; the commit driver
//! (`commit.rs`) drains the worklists later and calls
//! [`Tree::update_children_after_group`] / [`Tree::update_all_leaf_children`]
//! bottom-up.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::arena::{Arena, NodeId, RowId};
use crate::config::OrderPolicy;
use crate::node::TreeNode;
use crate::row::{RowRecord, GROUP_ROW_ID_PREFIX};

/// Result of [`Tree::update_children_after_group`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct GroupUpdate {
    /// `children_after_group` was replaced.
    pub changed: bool,
    /// Children were re-sorted and relinked.
    pub resorted: bool,
    /// Incoming source order disagreed with the preserved order.
    pub suppressed_reorder: bool,
}

/// Node and row storage plus the structural operations on them.
pub struct Tree<D> {
    pub(crate) nodes: Arena<NodeId, TreeNode>,
    pub(crate) rows: Arena<RowId, RowRecord<D>>,
    root: NodeId,
    empty: Arc<[RowId]>,
}

/// Iterator over a node's children in insertion order.
pub struct Children<'a> {
    nodes: &'a Arena<NodeId, TreeNode>,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.next?;
        self.next = self.nodes.get(id).and_then(|n| n.next_sibling);
        Some(id)
    }
}

impl<D> Tree<D> {
    /// Create a tree holding only the root.
    pub fn with_capacity(capacity: usize) -> Self {
        let empty: Arc<[RowId]> = Arc::from(Vec::new());
        let mut nodes = Arena::with_capacity(capacity);
        let root = nodes.insert(TreeNode::new("".into(), None, 0, &empty));
        Self {
            nodes,
            rows: Arena::with_capacity(capacity),
            root,
            empty,
        }
    }

    /// The synthetic root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Resolve a node handle.
    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    /// Resolve a row handle.
    pub fn row(&self, id: RowId) -> Option<&RowRecord<D>> {
        self.rows.get(id)
    }

    /// Number of live nodes, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of live rows, synthesized group rows included.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Children of `parent` in insertion order.
    pub fn children(&self, parent: NodeId) -> Children<'_> {
        Children {
            nodes: &self.nodes,
            next: self.nodes.get(parent).and_then(|n| n.first_child),
        }
    }

    /// Keys from the root (exclusive) down to `node` (inclusive).
    pub fn key_path(&self, node: NodeId) -> SmallVec<[&str; 8]> {
        let mut path = SmallVec::new();
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            let Some(n) = self.nodes.get(id) else { break };
            if n.parent.is_none() {
                break;
            }
            path.push(&*n.key);
            cursor = n.parent;
        }
        path.reverse();
        path
    }

    // =========================================================================
    // Rows
    // =========================================================================

    pub(crate) fn insert_row(&mut self, record: RowRecord<D>) -> RowId {
        self.rows.insert(record)
    }

    /// Drop a row record. The row must already be detached from the tree.
    pub(crate) fn free_row(&mut self, row: RowId) -> Option<RowRecord<D>> {
        debug_assert!(
            self.rows.get(row).map_or(true, |r| r.tree_node.is_none()),
            "freeing a row that is still attached"
        );
        self.rows.remove(row)
    }

    // =========================================================================
    // Children
    // =========================================================================

    /// Existing child for `key`, or a new filler child appended at the end.
    pub(crate) fn get_or_create_child(&mut self, parent: NodeId, key: &str) -> NodeId {
        if let Some(&child) = self.nodes[parent].children.get(key) {
            return child;
        }
        self.create_child(parent, key)
    }

    /// Like [`get_or_create_child`](Self::get_or_create_child), but an
    /// existing child is moved to the end of the insertion order.
    pub(crate) fn get_or_create_child_moved_to_end(&mut self, parent: NodeId, key: &str) -> NodeId {
        let child = match self.nodes[parent].children.get(key) {
            Some(&child) => child,
            None => return self.create_child(parent, key),
        };
        if self.nodes[parent].last_child != Some(child) {
            self.unlink_sibling(child);
            self.link_last(parent, child);
            self.nodes[parent].children_changed = true;
            self.invalidate(parent);
        }
        child
    }

    fn create_child(&mut self, parent: NodeId, key: &str) -> NodeId {
        let level = self.nodes[parent].level + 1;
        let child = self
            .nodes
            .insert(TreeNode::new(key.into(), Some(parent), level, &self.empty));
        self.nodes[parent].children.insert(key.into(), child);
        self.link_last(parent, child);
        self.nodes[parent].children_changed = true;
        self.invalidate(child);
        child
    }

    fn link_last(&mut self, parent: NodeId, child: NodeId) {
        let prev = self.nodes[parent].last_child;
        {
            let c = &mut self.nodes[child];
            c.prev_sibling = prev;
            c.next_sibling = None;
        }
        match prev {
            Some(prev) => self.nodes[prev].next_sibling = Some(child),
            None => self.nodes[parent].first_child = Some(child),
        }
        self.nodes[parent].last_child = Some(child);
    }

    fn unlink_sibling(&mut self, child: NodeId) {
        let c = &mut self.nodes[child];
        let (parent, prev, next) = (c.parent, c.prev_sibling.take(), c.next_sibling.take());
        let Some(parent) = parent else { return };
        self.unlink_links(parent, prev, next);
    }

    fn unlink_links(&mut self, parent: NodeId, prev: Option<NodeId>, next: Option<NodeId>) {
        match prev {
            Some(prev) => self.nodes[prev].next_sibling = next,
            None => self.nodes[parent].first_child = next,
        }
        match next {
            Some(next) => self.nodes[next].prev_sibling = prev,
            None => self.nodes[parent].last_child = prev,
        }
    }

    fn relink_children(&mut self, parent: NodeId, order: &[NodeId]) {
        let mut prev: Option<NodeId> = None;
        for &child in order {
            {
                let c = &mut self.nodes[child];
                c.prev_sibling = prev;
                c.next_sibling = None;
            }
            if let Some(prev) = prev {
                self.nodes[prev].next_sibling = Some(child);
            }
            prev = Some(child);
        }
        let p = &mut self.nodes[parent];
        p.first_child = order.first().copied();
        p.last_child = order.last().copied();
    }

    /// Detach an empty node from its parent and free it.
    ///
    /// Rows still referencing the node lose their back-reference; a
    /// synthesized group row is freed with the node.
    pub(crate) fn destroy(&mut self, node: NodeId) {
        debug_assert_ne!(node, self.root, "the root is never destroyed");
        self.detach_node(node);
        if let Some(parent) = self.nodes.get(node).and_then(|n| n.parent) {
            self.invalidate(parent);
        }
        self.free_node(node);
    }

    /// Unlink `node` from its parent's children and mark the parent changed,
    /// without queueing anything. Used while a commit is draining queues.
    pub(crate) fn detach_node(&mut self, node: NodeId) {
        let Some(n) = self.nodes.get(node) else { return };
        debug_assert!(n.first_child.is_none(), "destroying a node with children");
        let Some(parent) = n.parent else { return };
        let key = n.key.clone();
        self.unlink_sibling(node);
        let p = &mut self.nodes[parent];
        p.children.remove(&key);
        p.children_changed = true;
    }

    pub(crate) fn free_node(&mut self, node: NodeId) {
        let Some(n) = self.nodes.remove(node) else { return };
        for row in n.row.into_iter().chain(n.duplicate_rows) {
            if let Some(r) = self.rows.get_mut(row) {
                if r.tree_node == Some(node) {
                    r.tree_node = None;
                }
            }
        }
        if let Some(filler) = n.filler_row {
            self.rows.remove(filler);
        }
    }

    /// Destroy `node` and each ancestor left empty by it. Returns the number of
    /// nodes destroyed.
    pub(crate) fn prune(&mut self, node: NodeId) -> usize {
        let mut destroyed = 0;
        let mut cursor = node;
        while cursor != self.root {
            let Some(n) = self.nodes.get(cursor) else { break };
            if !n.is_empty() {
                break;
            }
            let parent = n.parent;
            self.destroy(cursor);
            destroyed += 1;
            match parent {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        destroyed
    }

    // =========================================================================
    // Row association
    // =========================================================================

    /// Make `row` the primary occupant of `node`. A previous primary is
    /// orphaned (its back-reference cleared), not freed.
    pub(crate) fn set_row(&mut self, node: NodeId, row: RowId) -> bool {
        let n = &mut self.nodes[node];
        if n.row == Some(row) {
            return false;
        }
        let previous = n.row.replace(row);
        if let Some(pos) = n.duplicate_rows.iter().position(|&d| d == row) {
            n.duplicate_rows.remove(pos);
        }
        let filler = n.filler_row.take();

        if let Some(previous) = previous {
            if let Some(r) = self.rows.get_mut(previous) {
                r.tree_node = None;
            }
        }
        self.rows[row].tree_node = Some(node);
        if let Some(filler) = filler {
            self.rows.remove(filler);
        }

        self.mark_parent_changed(node);
        self.invalidate(node);
        true
    }

    /// Remove `row` from the primary or duplicate slot of `node`. Removing the
    /// primary promotes the duplicate with the smallest source index.
    pub(crate) fn remove_row(&mut self, node: NodeId, row: RowId) -> bool {
        let n = &mut self.nodes[node];
        if n.row == Some(row) {
            let promoted = n
                .duplicate_rows
                .iter()
                .enumerate()
                .min_by_key(|&(_, &d)| self.rows.get(d).map_or(usize::MAX, |r| r.source_row_index))
                .map(|(pos, _)| pos)
                .map(|pos| n.duplicate_rows.remove(pos));
            n.row = promoted;
            if let Some(r) = self.rows.get_mut(row) {
                r.tree_node = None;
            }
            self.mark_parent_changed(node);
            self.invalidate(node);
            return true;
        }

        let Some(pos) = n.duplicate_rows.iter().position(|&d| d == row) else {
            return false;
        };
        n.duplicate_rows.remove(pos);
        if let Some(r) = self.rows.get_mut(row) {
            r.tree_node = None;
        }
        self.invalidate(node);
        true
    }

    /// Register `row` as an extra occupant of `node`. A node without a primary
    /// takes the row as primary instead.
    pub(crate) fn add_duplicate_row(&mut self, node: NodeId, row: RowId) -> bool {
        let n = &mut self.nodes[node];
        if n.row.is_none() {
            return self.set_row(node, row);
        }
        if n.row == Some(row) || n.duplicate_rows.contains(&row) {
            return false;
        }
        n.duplicate_rows.push(row);
        self.rows[row].tree_node = Some(node);
        self.invalidate(node);
        true
    }

    /// Swap the duplicate with the smallest source index into the primary
    /// slot. Returns the primary afterwards.
    pub(crate) fn sort_first_duplicate_row(&mut self, node: NodeId) -> Option<RowId> {
        let n = &self.nodes[node];
        let primary = n.row?;
        let mut best = primary;
        let mut best_idx = self.rows[primary].source_row_index;
        for &dup in &n.duplicate_rows {
            let idx = self.rows[dup].source_row_index;
            if idx < best_idx {
                best = dup;
                best_idx = idx;
            }
        }
        if best != primary {
            let n = &mut self.nodes[node];
            if let Some(slot) = n.duplicate_rows.iter_mut().find(|d| **d == best) {
                *slot = primary;
            }
            n.row = Some(best);
            self.mark_parent_changed(node);
        }
        Some(best)
    }

    fn mark_parent_changed(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node].parent {
            self.nodes[parent].children_changed = true;
        }
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Queue `node` for the next commit, together with every ancestor that is
    /// not queued yet.
    pub(crate) fn invalidate(&mut self, node: NodeId) {
        let mut cursor = node;
        loop {
            let n = &mut self.nodes[cursor];
            if n.queued {
                return;
            }
            n.queued = true;
            let Some(parent) = n.parent else { return };
            self.nodes[parent].invalidated.push(cursor);
            cursor = parent;
        }
    }

    /// The order key of `node` may have changed: make its parent re-evaluate
    /// the order of its children.
    pub(crate) fn invalidate_order(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node].parent {
            self.nodes[parent].children_changed = true;
            self.invalidate(parent);
        }
    }

    /// Mark every node for a full re-evaluation on the next commit.
    pub(crate) fn invalidate_all(&mut self) {
        let ids: Vec<NodeId> = self.nodes.keys().collect();
        for id in ids {
            let n = &mut self.nodes[id];
            n.children_changed = true;
            n.leaf_children_changed = true;
            self.invalidate(id);
        }
    }

    /// Whether anything is waiting for a commit.
    pub(crate) fn is_invalidated(&self) -> bool {
        self.nodes[self.root].queued
    }

    pub(crate) fn clear_root_queued(&mut self) {
        let root = self.root;
        self.nodes[root].queued = false;
    }

    /// Pop one queued child of `parent`, skipping handles whose node has been
    /// freed or no longer belongs to `parent`.
    pub(crate) fn dequeue_invalidated(&mut self, parent: NodeId) -> Option<NodeId> {
        while let Some(child) = self.nodes[parent].invalidated.pop() {
            match self.nodes.get_mut(child) {
                Some(c) if c.parent == Some(parent) && c.queued => {
                    c.queued = false;
                    return Some(child);
                }
                _ => continue,
            }
        }
        None
    }

    // =========================================================================
    // Derived arrays
    // =========================================================================

    /// Order key a node would get from the incoming data: its row's source
    /// index, or for a filler the smallest such key among its children.
    fn incoming_order(&self, node: NodeId) -> usize {
        let mut best = usize::MAX;
        let mut stack = vec![node];
        while let Some(cursor) = stack.pop() {
            match self.nodes[cursor].row {
                Some(row) => best = best.min(self.rows[row].source_row_index),
                None => stack.extend(self.children(cursor)),
            }
        }
        best
    }

    fn ensure_display_row(&mut self, node: NodeId) -> RowId {
        if let Some(row) = self.nodes[node].display_row() {
            return row;
        }
        let id = format!("{GROUP_ROW_ID_PREFIX}{}", self.key_path(node).join("/"));
        let row = self.rows.insert(RowRecord::filler_row(id, node));
        self.nodes[node].filler_row = Some(row);
        row
    }

    /// Rebuild `children_after_group` of `node` from its children.
    ///
    /// Children are ordered by their order key: with
    /// [`OrderPolicy::TrustSource`] the row's source index (a filler takes its
    /// first child's key); with [`OrderPolicy::MaintainPrior`] the position
    /// committed last time, new children going last. The children are only
    /// sorted, and the sibling list relinked to match, when the current
    /// insertion order has an inversion.
    pub(crate) fn update_children_after_group(
        &mut self,
        node: NodeId,
        tree_data: bool,
        policy: OrderPolicy,
    ) -> GroupUpdate {
        let is_root = node == self.root;
        let mut update = GroupUpdate::default();
        let n = &mut self.nodes[node];
        if !n.children_changed {
            return update;
        }
        n.children_changed = false;

        if (!tree_data && !is_root) || n.first_child.is_none() {
            if !n.children_after_group.is_empty() {
                n.children_after_group = Arc::clone(&self.empty);
                n.leaf_children_changed = true;
                update.changed = true;
            }
            return update;
        }

        let mut entries: Vec<(usize, NodeId)> = Vec::with_capacity(n.children.len());
        let mut prev_key = 0usize;
        for child in self.children(node) {
            let c = &self.nodes[child];
            let key = match policy {
                OrderPolicy::TrustSource => match c.row {
                    Some(row) => self.rows[row].source_row_index,
                    None => c.source_idx.unwrap_or(usize::MAX),
                },
                OrderPolicy::MaintainPrior => c.source_idx.unwrap_or(usize::MAX),
            };
            if key < prev_key {
                update.resorted = true;
            }
            prev_key = key;
            entries.push((key, child));
        }

        if update.resorted {
            entries.sort_by_key(|&(key, _)| key);
            let order: Vec<NodeId> = entries.iter().map(|&(_, id)| id).collect();
            self.relink_children(node, &order);
        }

        if policy == OrderPolicy::MaintainPrior {
            let mut prev_incoming = 0usize;
            for &(key, child) in &entries {
                if key == usize::MAX {
                    continue;
                }
                let incoming = self.incoming_order(child);
                if incoming < prev_incoming {
                    update.suppressed_reorder = true;
                }
                prev_incoming = incoming;
            }
        }

        let mut rows = Vec::with_capacity(entries.len());
        for (pos, &(key, child)) in entries.iter().enumerate() {
            self.nodes[child].source_idx = Some(match policy {
                OrderPolicy::TrustSource => key,
                OrderPolicy::MaintainPrior => pos,
            });
            rows.push(self.ensure_display_row(child));
        }

        let n = &mut self.nodes[node];
        if *n.children_after_group != rows[..] {
            n.children_after_group = Arc::from(rows);
            n.leaf_children_changed = true;
            update.changed = true;
        }

        // A filler takes the key of its first child.
        if policy == OrderPolicy::TrustSource && !is_root && n.row.is_none() {
            let first_key = entries.first().map(|&(key, _)| key);
            if n.source_idx != first_key {
                n.source_idx = first_key;
                self.mark_parent_changed(node);
            }
        }

        update
    }

    /// Rebuild `all_leaf_children` of `node` if a child reported a change.
    /// Returns whether the array changed; the parent is flagged only then.
    pub(crate) fn update_all_leaf_children(&mut self, node: NodeId) -> bool {
        let n = &self.nodes[node];
        if !n.leaf_children_changed {
            return false;
        }

        let mut leaves: Vec<RowId> = Vec::with_capacity(n.children_after_group.len());
        for &row in n.children_after_group.iter() {
            let child = self.rows[row].tree_node.and_then(|c| self.nodes.get(c));
            match child {
                Some(c) if !c.children_after_group.is_empty() => {
                    leaves.extend_from_slice(&c.all_leaf_children)
                }
                _ => leaves.push(row),
            }
        }

        let n = &mut self.nodes[node];
        n.leaf_children_changed = false;
        if *n.all_leaf_children == leaves[..] {
            return false;
        }
        n.all_leaf_children = Arc::from(leaves);
        if let Some(parent) = n.parent {
            self.nodes[parent].leaf_children_changed = true;
        }
        true
    }
}
