//! Children-field strategy: the hierarchy is the nesting of the data itself.
//!
//! Every data object becomes a node keyed by its row id under the node of the
//! object that contains it. Traversal is pre-order, so source indices follow
//! the reading order of the nested data.

use std::collections::HashSet;
use std::sync::Arc;

use super::{ManagerState, TreeStrategy};
use crate::arena::{NodeId, RowId};
use crate::config::{ChildrenFn, OrderPolicy};
use crate::error::TreeWarning;
use crate::row::data_addr;
use crate::tree::Tree;

pub(crate) struct ChildrenStrategy<D> {
    children: ChildrenFn<D>,
}

/// State of one traversal.
struct Walk {
    claimed: HashSet<RowId>,
    seen: HashSet<usize>,
    moved_to_end: bool,
    /// Existing rows the walk may take over. `None` during a full load, where
    /// every row is up for grabs.
    reusable: Option<HashSet<RowId>>,
}

impl Walk {
    fn new(moved_to_end: bool, capacity: usize) -> Self {
        Self {
            claimed: HashSet::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            moved_to_end,
            reusable: None,
        }
    }

    /// Only `rows` may be reused; any other existing row is a duplicate id.
    fn reusing(mut self, rows: HashSet<RowId>) -> Self {
        self.reusable = Some(rows);
        self
    }

    /// Whether `row` already belongs to a part of the tree this walk must not
    /// touch.
    fn is_foreign(&self, row: RowId) -> bool {
        !self.claimed.contains(&row) && self.reusable.as_ref().is_some_and(|rows| !rows.contains(&row))
    }
}

impl<D> ChildrenStrategy<D> {
    pub(crate) fn new(children: ChildrenFn<D>) -> Self {
        Self { children }
    }

    fn kids<'a>(&self, state: &ManagerState<D>, data: &'a D) -> &'a [Arc<D>] {
        if !state.tree_data {
            return &[];
        }
        (self.children)(data).unwrap_or(&[])
    }

    /// Walk `items` and their nested children depth-first, in order. Returns
    /// the row of the first item when it was accepted.
    fn walk(&self, state: &mut ManagerState<D>, items: Vec<(NodeId, Arc<D>, bool)>, walk: &mut Walk) -> Option<RowId> {
        let mut first = None;
        let mut stack = items;
        stack.reverse();
        let mut is_first = true;

        while let Some((parent, data, top_level)) = stack.pop() {
            let was_first = std::mem::take(&mut is_first);
            if !walk.seen.insert(data_addr(&data)) {
                let id = state.describe(&data);
                state.warn(TreeWarning::DuplicateDataObject { id });
                continue;
            }
            if state.lookup(&data).is_some_and(|existing| walk.is_foreign(existing)) {
                let id = state.describe(&data);
                state.warn(TreeWarning::DuplicateRowId { id });
                continue;
            }
            let index = state.fresh_index();
            let Some(row) = state.claim(&data, index, top_level, &mut walk.claimed) else {
                let id = state.describe(&data);
                state.warn(TreeWarning::DuplicateRowId { id });
                continue;
            };
            if was_first {
                first = Some(row);
            }

            let node = Self::attach(state, row, parent, walk.moved_to_end);
            for child in self.kids(state, &data).iter().rev() {
                stack.push((node, Arc::clone(child), false));
            }
        }
        first
    }

    /// Make `row` the occupant of the child of `parent` keyed by its id.
    fn attach(state: &mut ManagerState<D>, row: RowId, parent: NodeId, moved_to_end: bool) -> NodeId {
        let key = state.tree.rows[row].id.clone();
        if let Some(node) = state.tree.rows[row].tree_node {
            let n = &state.tree.nodes[node];
            if n.parent == Some(parent) && *n.key == *key {
                if moved_to_end {
                    state.child(parent, &key, true);
                }
                return node;
            }
            // Detach before creating the target: pruning the old branch may
            // remove empty nodes on the way to it.
            state.detach_row(row);
        }
        let node = state.child(parent, &key, moved_to_end);
        state.tree.set_row(node, row);
        node
    }
}

/// Data rows held in the subtree of `node`, descendants before ancestors.
fn subtree_rows<D>(tree: &Tree<D>, node: NodeId) -> Vec<RowId> {
    let mut rows = Vec::new();
    let mut stack = vec![(node, false)];
    while let Some((id, expanded)) = stack.pop() {
        let Some(n) = tree.node(id) else { continue };
        if expanded {
            rows.extend(n.row);
            rows.extend(n.duplicate_rows.iter().copied());
            continue;
        }
        stack.push((id, true));
        stack.extend(tree.children(id).map(|child| (child, false)));
    }
    rows
}

impl<D> TreeStrategy<D> for ChildrenStrategy<D> {
    fn load(&self, state: &mut ManagerState<D>, rows: &[Arc<D>]) {
        state.next_source_index = 0;
        let root = state.tree.root();
        let mut walk = Walk::new(state.policy == OrderPolicy::TrustSource, rows.len());
        let items = rows.iter().map(|data| (root, Arc::clone(data), true)).collect();
        self.walk(state, items, &mut walk);
        let removed = state.remove_unclaimed(&walk.claimed);
        tracing::debug!(
            rows = rows.len(),
            visited = walk.claimed.len(),
            removed,
            "loaded rows by nested children"
        );
    }

    fn add(&self, state: &mut ManagerState<D>, data: &Arc<D>) -> Option<RowId> {
        let root = state.tree.root();
        let mut walk = Walk::new(false, 1).reusing(HashSet::new());
        self.walk(state, vec![(root, Arc::clone(data), true)], &mut walk)
    }

    fn update(&self, state: &mut ManagerState<D>, row: RowId, data: &Arc<D>) {
        state.replace_data(row, data);
        let Some(node) = state.tree.rows[row].tree_node else {
            return;
        };
        let previous: Vec<RowId> = subtree_rows(&state.tree, node)
            .into_iter()
            .filter(|&r| r != row)
            .collect();

        let mut walk = Walk::new(false, previous.len() + 1).reusing(previous.iter().copied().collect());
        walk.claimed.insert(row);
        walk.seen.insert(data_addr(data));
        let items = self
            .kids(state, data)
            .iter()
            .map(|child| (node, Arc::clone(child), false))
            .collect();
        self.walk(state, items, &mut walk);

        for stale in previous {
            if !walk.claimed.contains(&stale) {
                state.remove_data_row(stale);
            }
        }
    }

    fn remove(&self, state: &mut ManagerState<D>, row: RowId) -> Vec<String> {
        let rows = match state.tree.rows.get(row).and_then(|r| r.tree_node) {
            Some(node) => subtree_rows(&state.tree, node),
            None => vec![row],
        };
        rows.into_iter()
            .filter_map(|r| state.remove_data_row(r))
            .collect()
    }

    fn supports_tree(&self) -> bool {
        true
    }
}
