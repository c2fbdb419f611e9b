//! Path-array strategy: each row names its own position as a list of keys.
//!
//! Without a path function, or while tree mode is off, the path of a row is
//! just `[id]` and the tree is flat.

use std::collections::HashSet;
use std::sync::Arc;

use super::{ManagerState, TreeStrategy};
use crate::arena::{NodeId, RowId};
use crate::config::{OrderPolicy, PathFn};
use crate::error::TreeWarning;

pub(crate) struct PathStrategy<D> {
    path: Option<PathFn<D>>,
}

impl<D> PathStrategy<D> {
    pub(crate) fn new(path: Option<PathFn<D>>) -> Self {
        Self { path }
    }

    fn tree_mode(&self, state: &ManagerState<D>) -> bool {
        state.tree_data && self.path.is_some()
    }

    fn path_of(&self, state: &ManagerState<D>, row: RowId, data: &D) -> Vec<String> {
        match &self.path {
            Some(path) if state.tree_data => path(data),
            _ => vec![state.tree.rows[row].id.clone()],
        }
    }

    /// Whether `row` currently sits on the node at `path`.
    fn is_at(state: &ManagerState<D>, row: RowId, path: &[String]) -> bool {
        let Some(node) = state.tree.rows[row].tree_node else {
            return false;
        };
        let current = state.tree.key_path(node);
        current.len() == path.len() && current.iter().zip(path).all(|(a, b)| *a == b.as_str())
    }

    /// Put `row` on the node at `path`. Returns whether the row moved.
    ///
    /// During a full load, `claimed` holds the rows seen so far: a primary that
    /// is not claimed yet is about to be removed, so it is replaced instead of
    /// getting a duplicate.
    fn place(
        &self,
        state: &mut ManagerState<D>,
        row: RowId,
        path: &[String],
        moved_to_end: bool,
        claimed: Option<&HashSet<RowId>>,
    ) -> bool {
        if path.is_empty() {
            let id = state.tree.rows[row].id.clone();
            state.warn(TreeWarning::EmptyPath { id });
            let attached = state.tree.rows[row].tree_node.is_some();
            state.detach_row(row);
            return attached;
        }
        if Self::is_at(state, row, path) {
            return false;
        }
        state.detach_row(row);

        let mut node: NodeId = state.tree.root();
        for key in path {
            node = state.child(node, key, moved_to_end);
        }

        let current = state.tree.nodes[node].row;
        match current {
            None => {
                state.tree.set_row(node, row);
            }
            Some(primary) if claimed.is_some_and(|claimed| !claimed.contains(&primary)) => {
                state.tree.set_row(node, row);
            }
            Some(_) => {
                if self.tree_mode(state) {
                    let id = state.tree.rows[row].id.clone();
                    state.warn(TreeWarning::DuplicatePath {
                        id,
                        path: path.to_vec(),
                    });
                }
                state.tree.add_duplicate_row(node, row);
            }
        }
        true
    }
}

impl<D> TreeStrategy<D> for PathStrategy<D> {
    fn load(&self, state: &mut ManagerState<D>, rows: &[Arc<D>]) {
        let mut claimed = HashSet::with_capacity(rows.len());
        let moved_to_end = state.policy == OrderPolicy::TrustSource;
        for (index, data) in rows.iter().enumerate() {
            let row = match state.claim(data, index, true, &mut claimed) {
                Some(row) => row,
                None => {
                    let id = state.describe(data);
                    state.warn(TreeWarning::DuplicateRowId { id });
                    state.claim_shadow(data, index, true, &mut claimed)
                }
            };
            let path = self.path_of(state, row, data);
            self.place(state, row, &path, moved_to_end, Some(&claimed));
        }
        let removed = state.remove_unclaimed(&claimed);
        state.next_source_index = rows.len();
        tracing::debug!(rows = rows.len(), removed, "loaded rows by path");
    }

    fn add(&self, state: &mut ManagerState<D>, data: &Arc<D>) -> Option<RowId> {
        let index = state.fresh_index();
        let row = state.create_row(data, index, true, false);
        let path = self.path_of(state, row, data);
        self.place(state, row, &path, false, None);
        Some(row)
    }

    fn update(&self, state: &mut ManagerState<D>, row: RowId, data: &Arc<D>) {
        state.replace_data(row, data);
        let path = self.path_of(state, row, data);
        if self.place(state, row, &path, false, None) && !path.is_empty() {
            // Re-associated rows go after the existing ones.
            let index = state.fresh_index();
            state.set_source_index(row, index);
        }
    }

    fn remove(&self, state: &mut ManagerState<D>, row: RowId) -> Vec<String> {
        state.remove_data_row(row).into_iter().collect()
    }

    fn supports_tree(&self) -> bool {
        self.path.is_some()
    }
}
