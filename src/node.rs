//! Tree nodes: one per distinct key at one level of the hierarchy.

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::arena::{NodeId, RowId};

/// Tagged view of a node's occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Holds a data row and has no children.
    Leaf(RowId),
    /// Holds a data row and has children.
    Group(RowId),
    /// Has children but no data row.
    Filler,
    /// No row, no children. Pruned before a commit completes (never the case
    /// for the root, which is reported as `Filler` or `Empty` by content).
    Empty,
}

/// A node of the secondary tree.
///
/// Children are kept in an insertion-ordered, doubly linked sibling list
/// (`first_child`/`next_sibling`) with a key index for lookup, so moving a
/// child to the end or unlinking it is O(1).
#[derive(Debug)]
pub struct TreeNode {
    pub(crate) key: Box<str>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) level: u32,

    pub(crate) children: HashMap<Box<str>, NodeId>,
    pub(crate) first_child: Option<NodeId>,
    pub(crate) last_child: Option<NodeId>,
    pub(crate) prev_sibling: Option<NodeId>,
    pub(crate) next_sibling: Option<NodeId>,

    /// Primary occupant.
    pub(crate) row: Option<RowId>,
    /// Synthesized group row, only while the node is a filler.
    pub(crate) filler_row: Option<RowId>,
    pub(crate) duplicate_rows: SmallVec<[RowId; 2]>,

    /// Committed order key. `None` until the parent commits this node.
    pub(crate) source_idx: Option<usize>,
    pub(crate) children_after_group: Arc<[RowId]>,
    pub(crate) all_leaf_children: Arc<[RowId]>,

    pub(crate) children_changed: bool,
    pub(crate) leaf_children_changed: bool,

    /// Queued in the parent's `invalidated` worklist.
    pub(crate) queued: bool,
    /// Invalidated direct children awaiting commit.
    pub(crate) invalidated: Vec<NodeId>,
}

impl TreeNode {
    pub(crate) fn new(key: Box<str>, parent: Option<NodeId>, level: u32, empty: &Arc<[RowId]>) -> Self {
        Self {
            key,
            parent,
            level,
            children: HashMap::new(),
            first_child: None,
            last_child: None,
            prev_sibling: None,
            next_sibling: None,
            row: None,
            filler_row: None,
            duplicate_rows: SmallVec::new(),
            source_idx: None,
            children_after_group: Arc::clone(empty),
            all_leaf_children: Arc::clone(empty),
            children_changed: true,
            leaf_children_changed: true,
            queued: false,
            invalidated: Vec::new(),
        }
    }

    /// Key of this node among its siblings. Empty for the root.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Parent node; `None` for the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Depth below the root (the root is level 0).
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Primary data row.
    pub fn row(&self) -> Option<RowId> {
        self.row
    }

    /// Row shown for this node: the data row, or the synthesized group row of
    /// a filler.
    pub fn display_row(&self) -> Option<RowId> {
        self.row.or(self.filler_row)
    }

    /// Extra rows sharing this node's key.
    pub fn duplicate_rows(&self) -> &[RowId] {
        &self.duplicate_rows
    }

    /// Order key recorded by the last commit of the parent.
    pub fn source_idx(&self) -> Option<usize> {
        self.source_idx
    }

    /// Committed child rows, in order.
    pub fn children_after_group(&self) -> &[RowId] {
        &self.children_after_group
    }

    /// Committed descendant leaf rows, in order.
    pub fn all_leaf_children(&self) -> &[RowId] {
        &self.all_leaf_children
    }

    /// Number of child nodes.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Whether the node has child nodes.
    pub fn has_children(&self) -> bool {
        self.first_child.is_some()
    }

    /// Child node for `key`.
    pub fn child(&self, key: &str) -> Option<NodeId> {
        self.children.get(key).copied()
    }

    /// Tagged occupancy state.
    pub fn kind(&self) -> NodeKind {
        match (self.row, self.has_children()) {
            (Some(row), false) => NodeKind::Leaf(row),
            (Some(row), true) => NodeKind::Group(row),
            (None, true) => NodeKind::Filler,
            (None, false) => NodeKind::Empty,
        }
    }

    /// No row, no duplicates and no children: eligible for pruning.
    pub fn is_empty(&self) -> bool {
        self.row.is_none() && self.duplicate_rows.is_empty() && self.first_child.is_none()
    }
}
