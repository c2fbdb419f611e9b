//! Tree manager: turns row data into tree mutations.
//!
//! [`ManagerState`] owns the tree together with the row lookup maps and the
//! source index counter. A [`TreeStrategy`] derives where each row goes, either
//! from an explicit path per row ([`PathStrategy`], which also covers flat
//! mode) or from nested children ([`ChildrenStrategy`]).

mod children;
mod path;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::arena::{NodeId, RowId};
use crate::config::{OrderPolicy, RowIdFn, TreeSource};
use crate::error::TreeWarning;
use crate::row::{data_addr, RowKind, RowRecord};
use crate::tree::Tree;

pub(crate) use children::ChildrenStrategy;
pub(crate) use path::PathStrategy;

/// Derives the tree position of rows and applies it to the tree.
pub(crate) trait TreeStrategy<D> {
    /// Replace the whole dataset. Rows are matched to existing records by
    /// identity; records not present in `rows` are removed.
    fn load(&self, state: &mut ManagerState<D>, rows: &[Arc<D>]);

    /// Insert a new top-level row. Returns `None` when the row was rejected.
    fn add(&self, state: &mut ManagerState<D>, data: &Arc<D>) -> Option<RowId>;

    /// Replace the data of an existing row and move it if its position changed.
    fn update(&self, state: &mut ManagerState<D>, row: RowId, data: &Arc<D>);

    /// Remove a row. Returns the ids of every removed row.
    fn remove(&self, state: &mut ManagerState<D>, row: RowId) -> Vec<String>;

    /// Whether this strategy can build a hierarchy.
    fn supports_tree(&self) -> bool;
}

/// The configured strategy.
pub(crate) enum Strategy<D> {
    Path(PathStrategy<D>),
    Children(ChildrenStrategy<D>),
}

impl<D> Strategy<D> {
    pub(crate) fn from_source(source: TreeSource<D>) -> Self {
        match source {
            TreeSource::None => Self::Path(PathStrategy::new(None)),
            TreeSource::Path(path) => Self::Path(PathStrategy::new(Some(path))),
            TreeSource::Children(children) => Self::Children(ChildrenStrategy::new(children)),
        }
    }

    pub(crate) fn as_dyn(&self) -> &dyn TreeStrategy<D> {
        match self {
            Self::Path(strategy) => strategy,
            Self::Children(strategy) => strategy,
        }
    }
}

/// Tree plus the bookkeeping shared by both strategies.
pub(crate) struct ManagerState<D> {
    pub(crate) tree: Tree<D>,
    /// Data rows by id.
    ids: HashMap<String, RowId>,
    /// Data rows by data address, only used without a row id callback.
    by_data: HashMap<usize, RowId>,
    /// Rows whose identity collided with an earlier row. They are hidden from
    /// the lookup maps until the row shadowing them is removed.
    shadowed: Vec<RowId>,
    row_id: Option<RowIdFn<D>>,
    next_seq_id: u64,
    pub(crate) next_source_index: usize,
    data_rows: usize,
    pub(crate) policy: OrderPolicy,
    pub(crate) tree_data: bool,
    warnings: Vec<TreeWarning>,
}

impl<D> ManagerState<D> {
    pub(crate) fn new(
        row_id: Option<RowIdFn<D>>,
        policy: OrderPolicy,
        tree_data: bool,
        capacity: usize,
    ) -> Self {
        Self {
            tree: Tree::with_capacity(capacity),
            ids: HashMap::with_capacity(capacity),
            by_data: HashMap::new(),
            shadowed: Vec::new(),
            row_id,
            next_seq_id: 0,
            next_source_index: 0,
            data_rows: 0,
            policy,
            tree_data,
            warnings: Vec::new(),
        }
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub(crate) fn warn(&mut self, warning: TreeWarning) {
        tracing::warn!(row = warning.row_id(), "{warning}");
        self.warnings.push(warning);
    }

    pub(crate) fn warnings(&self) -> &[TreeWarning] {
        &self.warnings
    }

    pub(crate) fn take_warnings(&mut self) -> Vec<TreeWarning> {
        std::mem::take(&mut self.warnings)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Existing row for `data`, by id or by data reference.
    pub(crate) fn lookup(&self, data: &Arc<D>) -> Option<RowId> {
        match &self.row_id {
            Some(row_id) => self.ids.get(&row_id(data)).copied(),
            None => self.by_data.get(&data_addr(data)).copied(),
        }
    }

    pub(crate) fn row_by_id(&self, id: &str) -> Option<RowId> {
        self.ids.get(id).copied()
    }

    /// Id used in warnings about `data`.
    pub(crate) fn describe(&self, data: &Arc<D>) -> String {
        if let Some(row_id) = &self.row_id {
            return row_id(data);
        }
        match self.lookup(data) {
            Some(row) => self.tree.rows[row].id.clone(),
            None => String::new(),
        }
    }

    fn same_identity(&self, row: RowId, id: &str, addr: Option<usize>) -> bool {
        let record = &self.tree.rows[row];
        match self.row_id {
            Some(_) => record.id == id,
            None => record.data_addr() == addr,
        }
    }

    fn find_shadow(&self, data: &Arc<D>, claimed: &HashSet<RowId>) -> Option<RowId> {
        let id = self.row_id.as_ref().map(|row_id| row_id(data)).unwrap_or_default();
        let addr = Some(data_addr(data));
        self.shadowed
            .iter()
            .copied()
            .find(|&row| !claimed.contains(&row) && self.same_identity(row, &id, addr))
    }

    /// Number of live data rows.
    pub(crate) fn len(&self) -> usize {
        self.data_rows
    }

    // =========================================================================
    // Row records
    // =========================================================================

    /// Next source index for rows inserted outside a full load.
    pub(crate) fn fresh_index(&mut self) -> usize {
        let index = self.next_source_index;
        self.next_source_index += 1;
        index
    }

    /// Create a data row. A shadow row is kept out of the lookup maps.
    pub(crate) fn create_row(&mut self, data: &Arc<D>, index: usize, top_level: bool, shadow: bool) -> RowId {
        let id = match &self.row_id {
            Some(row_id) => row_id(data),
            None => {
                self.next_seq_id += 1;
                (self.next_seq_id - 1).to_string()
            }
        };
        let row = self
            .tree
            .insert_row(RowRecord::data_row(id.clone(), Arc::clone(data), index, top_level));
        self.data_rows += 1;

        match (&self.row_id, shadow) {
            (Some(_), true) => self.shadowed.push(row),
            (None, true) => {
                self.ids.insert(id, row);
                self.shadowed.push(row);
            }
            (Some(_), false) => {
                self.ids.insert(id, row);
            }
            (None, false) => {
                self.ids.insert(id, row);
                self.by_data.insert(data_addr(data), row);
            }
        }
        row
    }

    /// Row for `data` during a full load: the existing record refreshed in
    /// place, or a new one. Returns `None` if the identity was already claimed
    /// by an earlier row of the same load.
    pub(crate) fn claim(
        &mut self,
        data: &Arc<D>,
        index: usize,
        top_level: bool,
        claimed: &mut HashSet<RowId>,
    ) -> Option<RowId> {
        let row = match self.lookup(data) {
            Some(row) if claimed.contains(&row) => return None,
            Some(row) => {
                self.refresh(row, data, index, top_level);
                row
            }
            None => self.create_row(data, index, top_level, false),
        };
        claimed.insert(row);
        Some(row)
    }

    /// Extra row for an identity that was already claimed in this load,
    /// reusing a shadow row from the previous load when there is one.
    pub(crate) fn claim_shadow(
        &mut self,
        data: &Arc<D>,
        index: usize,
        top_level: bool,
        claimed: &mut HashSet<RowId>,
    ) -> RowId {
        let row = match self.find_shadow(data, claimed) {
            Some(row) => {
                self.refresh(row, data, index, top_level);
                row
            }
            None => self.create_row(data, index, top_level, true),
        };
        claimed.insert(row);
        row
    }

    fn refresh(&mut self, row: RowId, data: &Arc<D>, index: usize, top_level: bool) {
        let record = &mut self.tree.rows[row];
        record.top_level = top_level;
        let swapped = record.data_addr() != Some(data_addr(data));
        if swapped {
            record.data = Some(Arc::clone(data));
            if let Some(node) = record.tree_node {
                self.tree.invalidate(node);
            }
        }
        self.set_source_index(row, index);
    }

    /// Swap the data of `row` and queue its node.
    pub(crate) fn replace_data(&mut self, row: RowId, data: &Arc<D>) {
        let record = &mut self.tree.rows[row];
        record.data = Some(Arc::clone(data));
        if let Some(node) = record.tree_node {
            self.tree.invalidate(node);
        }
    }

    /// Change the source index of `row` and queue whatever has to re-sort.
    pub(crate) fn set_source_index(&mut self, row: RowId, index: usize) {
        let record = &mut self.tree.rows[row];
        if record.source_row_index == index {
            return;
        }
        record.source_row_index = index;
        let Some(node) = record.tree_node else { return };

        let n = &self.tree.nodes[node];
        let primary = n.row == Some(row);
        if !n.duplicate_rows.is_empty() {
            self.tree.invalidate(node);
        }
        if primary {
            self.tree.invalidate_order(node);
        }
    }

    /// Take `row` out of the tree, pruning nodes left empty. The record stays.
    pub(crate) fn detach_row(&mut self, row: RowId) {
        let Some(node) = self.tree.rows.get(row).and_then(|r| r.tree_node) else {
            return;
        };
        self.tree.remove_row(node, row);
        self.tree.prune(node);
    }

    /// Child of `parent` for `key`, moved to the end of the insertion order
    /// when `moved_to_end` is set.
    pub(crate) fn child(&mut self, parent: NodeId, key: &str, moved_to_end: bool) -> NodeId {
        if moved_to_end {
            self.tree.get_or_create_child_moved_to_end(parent, key)
        } else {
            self.tree.get_or_create_child(parent, key)
        }
    }

    /// Detach and free a data row. Returns its id, or `None` if the handle is
    /// stale.
    pub(crate) fn remove_data_row(&mut self, row: RowId) -> Option<String> {
        self.detach_row(row);
        let record = self.tree.free_row(row)?;
        self.data_rows -= 1;
        self.forget(row, &record);
        Some(record.id)
    }

    /// Drop `row` from the lookup maps and let a shadow row with the same
    /// identity take its place.
    fn forget(&mut self, row: RowId, record: &RowRecord<D>) {
        let shadow_pos = self.shadowed.iter().position(|&r| r == row);
        if let Some(pos) = shadow_pos {
            self.shadowed.remove(pos);
        }
        if self.ids.get(&record.id) == Some(&row) {
            self.ids.remove(&record.id);
        }
        let addr = record.data_addr();
        if let Some(addr) = addr {
            if self.by_data.get(&addr) == Some(&row) {
                self.by_data.remove(&addr);
            }
        }
        if shadow_pos.is_some() {
            return;
        }

        let promoted = self
            .shadowed
            .iter()
            .position(|&r| self.same_identity(r, &record.id, addr));
        let Some(pos) = promoted else { return };
        let heir = self.shadowed.remove(pos);
        match (&self.row_id, addr) {
            (Some(_), _) => {
                self.ids.insert(record.id.clone(), heir);
            }
            (None, Some(addr)) => {
                self.by_data.insert(addr, heir);
            }
            (None, None) => {}
        }
    }

    /// Free every data row not claimed by the load that just ran.
    pub(crate) fn remove_unclaimed(&mut self, claimed: &HashSet<RowId>) -> usize {
        let stale: Vec<RowId> = self
            .tree
            .rows
            .iter()
            .filter(|(row, record)| record.kind == RowKind::Data && !claimed.contains(row))
            .map(|(row, _)| row)
            .collect();
        for &row in &stale {
            self.remove_data_row(row);
        }
        stale.len()
    }

    /// Top-level rows in source order.
    pub(crate) fn top_level_rows(&self) -> Vec<RowId> {
        let mut rows: Vec<(usize, RowId)> = self
            .tree
            .rows
            .iter()
            .filter(|(_, record)| record.kind == RowKind::Data && record.top_level)
            .map(|(row, record)| (record.source_row_index, row))
            .collect();
        rows.sort_unstable();
        rows.into_iter().map(|(_, row)| row).collect()
    }

    /// Data of the top-level rows, in source order.
    pub(crate) fn top_level_data(&self) -> Vec<Arc<D>> {
        self.top_level_rows()
            .into_iter()
            .filter_map(|row| self.tree.rows[row].data.clone())
            .collect()
    }

    /// Move `added` to position `index` of the top-level order and renumber
    /// the top-level rows from zero.
    pub(crate) fn insert_at_index(&mut self, index: usize, added: &[RowId]) {
        if added.is_empty() {
            return;
        }
        let mut order: Vec<RowId> = self
            .top_level_rows()
            .into_iter()
            .filter(|row| !added.contains(row))
            .collect();
        let at = index.min(order.len());
        order.splice(at..at, added.iter().copied());
        for (position, &row) in order.iter().enumerate() {
            self.set_source_index(row, position);
        }
        self.next_source_index = self.next_source_index.max(order.len());
        if self.policy == OrderPolicy::MaintainPrior {
            self.splice_committed_order(index, added);
        }
    }

    /// With [`OrderPolicy::MaintainPrior`] the root keeps its committed order,
    /// so the branches created for `added` are spliced into that order at
    /// `index`. Rows added to existing branches keep their place in them.
    fn splice_committed_order(&mut self, index: usize, added: &[RowId]) {
        let root = self.tree.root();
        let mut fresh: Vec<NodeId> = Vec::new();
        for &row in added {
            let Some(mut node) = self.tree.rows.get(row).and_then(|r| r.tree_node) else {
                continue;
            };
            while let Some(parent) = self.tree.nodes[node].parent.filter(|&p| p != root) {
                node = parent;
            }
            if self.tree.nodes[node].source_idx.is_none() && !fresh.contains(&node) {
                fresh.push(node);
            }
        }
        let Some(&first) = fresh.first() else { return };

        let mut committed: Vec<(usize, NodeId)> = self
            .tree
            .children(root)
            .filter_map(|child| self.tree.nodes[child].source_idx.map(|pos| (pos, child)))
            .collect();
        committed.sort_unstable();
        let mut order: Vec<NodeId> = committed.into_iter().map(|(_, node)| node).collect();
        let at = index.min(order.len());
        order.splice(at..at, fresh);
        for (position, &node) in order.iter().enumerate() {
            self.tree.nodes[node].source_idx = Some(position);
        }
        self.tree.invalidate_order(first);
    }
}
