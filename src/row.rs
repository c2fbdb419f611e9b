//! Row records.

use std::sync::Arc;

use crate::arena::NodeId;

/// Prefix of the ids given to synthesized group rows.
pub const GROUP_ROW_ID_PREFIX: &str = "row-group-";

/// What a row record stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    /// Backed by a caller-supplied data object.
    Data,
    /// Synthesized for a filler node (a path segment with no data row).
    Filler,
}

/// One logical row: a leaf, a group backed by data, or a synthesized group.
///
/// The record never owns its tree node; `tree_node` is a handle that the tree
/// keeps in sync with the node's `row`/duplicate slots.
#[derive(Debug)]
pub struct RowRecord<D> {
    pub(crate) id: String,
    pub(crate) data: Option<Arc<D>>,
    pub(crate) kind: RowKind,
    pub(crate) source_row_index: usize,
    pub(crate) tree_node: Option<NodeId>,
    /// Supplied directly in the dataset (as opposed to reached through a
    /// parent's children field).
    pub(crate) top_level: bool,
}

impl<D> RowRecord<D> {
    pub(crate) fn data_row(id: String, data: Arc<D>, source_row_index: usize, top_level: bool) -> Self {
        Self {
            id,
            data: Some(data),
            kind: RowKind::Data,
            source_row_index,
            tree_node: None,
            top_level,
        }
    }

    pub(crate) fn filler_row(id: String, node: NodeId) -> Self {
        Self {
            id,
            data: None,
            kind: RowKind::Filler,
            source_row_index: usize::MAX,
            tree_node: Some(node),
            top_level: false,
        }
    }

    /// Row id. Data rows use the configured id callback or a sequential id;
    /// filler rows use [`GROUP_ROW_ID_PREFIX`] followed by their key path.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The caller's data object. `None` for filler rows.
    pub fn data(&self) -> Option<&Arc<D>> {
        self.data.as_ref()
    }

    /// Row kind.
    pub fn kind(&self) -> RowKind {
        self.kind
    }

    /// Whether this row was synthesized for a filler node.
    pub fn is_filler(&self) -> bool {
        self.kind == RowKind::Filler
    }

    /// Position in the most recent ordered traversal of the dataset.
    pub fn source_row_index(&self) -> usize {
        self.source_row_index
    }

    /// Node currently holding this row, as primary or duplicate.
    pub fn tree_node(&self) -> Option<NodeId> {
        self.tree_node
    }

    /// Whether the row was supplied at the top level of the dataset.
    pub fn is_top_level(&self) -> bool {
        self.top_level
    }

    /// Address of the data object, used to match rows by reference when no
    /// row id callback is configured.
    pub(crate) fn data_addr(&self) -> Option<usize> {
        self.data.as_ref().map(data_addr)
    }
}

#[inline]
pub(crate) fn data_addr<D>(data: &Arc<D>) -> usize {
    Arc::as_ptr(data) as *const () as usize
}
