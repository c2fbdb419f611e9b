//! Incremental row transactions.

use std::fmt;
use std::sync::Arc;

use crate::arena::RowId;

/// A batch of row mutations.
///
/// Applied in a fixed order: removals, then updates, then adds. Rows are
/// matched by the configured row id, or by data reference when there is none.
pub struct RowTransaction<D> {
    /// New top-level rows.
    pub add: Vec<Arc<D>>,
    /// Position in the top-level source order for `add`; appended when `None`.
    pub add_index: Option<usize>,
    /// Replacement data for existing rows. Unknown rows are added.
    pub update: Vec<Arc<D>>,
    /// Rows to remove. Unknown rows are ignored.
    pub remove: Vec<Arc<D>>,
}

impl<D> Default for RowTransaction<D> {
    fn default() -> Self {
        Self {
            add: Vec::new(),
            add_index: None,
            update: Vec::new(),
            remove: Vec::new(),
        }
    }
}

impl<D> RowTransaction<D> {
    /// Empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rows to add.
    pub fn add(mut self, rows: impl IntoIterator<Item = Arc<D>>) -> Self {
        self.add.extend(rows);
        self
    }

    /// Insert the added rows at `index` in the top-level order.
    pub fn add_at(mut self, index: usize) -> Self {
        self.add_index = Some(index);
        self
    }

    /// Append rows to update.
    pub fn update(mut self, rows: impl IntoIterator<Item = Arc<D>>) -> Self {
        self.update.extend(rows);
        self
    }

    /// Append rows to remove.
    pub fn remove(mut self, rows: impl IntoIterator<Item = Arc<D>>) -> Self {
        self.remove.extend(rows);
        self
    }

    /// Whether the transaction carries no rows.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.update.is_empty() && self.remove.is_empty()
    }
}

impl<D> fmt::Debug for RowTransaction<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowTransaction")
            .field("add", &self.add.len())
            .field("add_index", &self.add_index)
            .field("update", &self.update.len())
            .field("remove", &self.remove.len())
            .finish()
    }
}

/// Rows touched by an applied transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionResult {
    /// Newly created rows, including updates of unknown rows.
    pub add: Vec<RowId>,
    /// Rows whose data was replaced.
    pub update: Vec<RowId>,
    /// Ids of removed rows. The records are gone, so only the id is kept.
    pub remove: Vec<String>,
}

impl TransactionResult {
    /// Whether nothing was added, updated or removed.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.update.is_empty() && self.remove.is_empty()
    }
}
