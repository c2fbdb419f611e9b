//! The public facade: load data, apply transactions, read the committed tree.

use std::sync::Arc;

use crate::arena::{NodeId, RowId};
use crate::commit::CommitOutcome;
use crate::config::{OrderPolicy, TreeConfig};
use crate::error::{ConfigError, TreeWarning};
use crate::manager::{ManagerState, Strategy};
use crate::node::TreeNode;
use crate::row::RowRecord;
use crate::transaction::{RowTransaction, TransactionResult};
use crate::tree::Tree;

/// Hierarchical row model over a flat or nested dataset.
///
/// Every mutating call applies its changes and then commits once, so the
/// derived arrays are always up to date when control returns. Transactions
/// queued with [`queue_transaction`](Self::queue_transaction) share a single
/// commit in [`flush_transactions`](Self::flush_transactions).
pub struct TreeRowModel<D> {
    state: ManagerState<D>,
    strategy: Strategy<D>,
    pending: Vec<RowTransaction<D>>,
    /// Set by full reloads; the next commit reports an inactive changed path.
    reloaded: bool,
    last_commit: CommitOutcome,
}

impl<D> TreeRowModel<D> {
    /// Create an empty model.
    pub fn new(config: TreeConfig<D>) -> Result<Self, ConfigError> {
        config.validate()?;
        let TreeConfig {
            row_id,
            source,
            tree_data,
            order,
            initial_capacity,
        } = config;
        Ok(Self {
            state: ManagerState::new(row_id, order, tree_data, initial_capacity),
            strategy: Strategy::from_source(source),
            pending: Vec::new(),
            reloaded: false,
            last_commit: CommitOutcome::default(),
        })
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Replace the whole dataset and commit.
    ///
    /// Rows are matched to existing records by id (or data reference), so
    /// unchanged rows keep their handles.
    pub fn set_row_data(&mut self, rows: &[Arc<D>]) -> &CommitOutcome {
        self.strategy.as_dyn().load(&mut self.state, rows);
        self.reloaded = true;
        self.commit()
    }

    /// Apply a transaction and commit.
    pub fn apply_transaction(&mut self, transaction: RowTransaction<D>) -> TransactionResult {
        let result = self.apply(transaction);
        self.commit();
        result
    }

    /// Queue a transaction for [`flush_transactions`](Self::flush_transactions).
    pub fn queue_transaction(&mut self, transaction: RowTransaction<D>) {
        self.pending.push(transaction);
    }

    /// Number of queued transactions.
    pub fn pending_transactions(&self) -> usize {
        self.pending.len()
    }

    /// Apply every queued transaction in order, then commit once.
    pub fn flush_transactions(&mut self) -> Vec<TransactionResult> {
        let pending = std::mem::take(&mut self.pending);
        let results = pending.into_iter().map(|tx| self.apply(tx)).collect();
        self.commit();
        results
    }

    fn apply(&mut self, transaction: RowTransaction<D>) -> TransactionResult {
        let RowTransaction {
            add,
            add_index,
            update,
            remove,
        } = transaction;
        let strategy = self.strategy.as_dyn();
        let state = &mut self.state;
        let mut result = TransactionResult::default();

        for data in &remove {
            match state.lookup(data) {
                Some(row) => result.remove.extend(strategy.remove(state, row)),
                None => tracing::debug!(id = %state.describe(data), "ignoring removal of unknown row"),
            }
        }

        for data in &update {
            match state.lookup(data) {
                Some(row) => {
                    strategy.update(state, row, data);
                    result.update.push(row);
                }
                None => result.add.extend(strategy.add(state, data)),
            }
        }

        let mut added = Vec::with_capacity(add.len());
        for data in &add {
            if state.lookup(data).is_some() {
                let id = state.describe(data);
                state.warn(TreeWarning::DuplicateAdd { id });
                continue;
            }
            added.extend(strategy.add(state, data));
        }
        if let Some(index) = add_index {
            state.insert_at_index(index, &added);
        }
        result.add.extend(added);

        tracing::debug!(
            added = result.add.len(),
            updated = result.update.len(),
            removed = result.remove.len(),
            "applied transaction"
        );
        result
    }

    /// Turn tree mode on or off and rebuild from the current top-level rows.
    ///
    /// Fails when enabling tree mode without a path function or children
    /// accessor.
    pub fn set_tree_data(&mut self, tree_data: bool) -> Result<&CommitOutcome, ConfigError> {
        if tree_data && !self.strategy.as_dyn().supports_tree() {
            return Err(ConfigError::MissingTreeSource);
        }
        if tree_data != self.state.tree_data {
            self.state.tree_data = tree_data;
            let rows = self.state.top_level_data();
            self.strategy.as_dyn().load(&mut self.state, &rows);
            self.state.tree.invalidate_all();
            self.reloaded = true;
        }
        Ok(self.commit())
    }

    /// Switch between following the incoming order and keeping the committed
    /// one. Every node re-evaluates its order on the commit that follows.
    pub fn set_maintain_order(&mut self, maintain: bool) -> &CommitOutcome {
        let policy = if maintain {
            OrderPolicy::MaintainPrior
        } else {
            OrderPolicy::TrustSource
        };
        if policy != self.state.policy {
            self.state.policy = policy;
            self.state.tree.invalidate_all();
        }
        self.commit()
    }

    /// Commit pending invalidations. A no-op when nothing changed.
    pub fn commit(&mut self) -> &CommitOutcome {
        let mut outcome = self.state.tree.commit(self.state.tree_data, self.state.policy);
        if std::mem::take(&mut self.reloaded) {
            outcome.changed_path.deactivate();
        }
        self.last_commit = outcome;
        &self.last_commit
    }

    /// Outcome of the most recent commit.
    pub fn last_commit(&self) -> &CommitOutcome {
        &self.last_commit
    }

    /// Drain the warnings collected so far.
    pub fn take_warnings(&mut self) -> Vec<TreeWarning> {
        self.state.take_warnings()
    }

    /// Warnings collected since the last [`take_warnings`](Self::take_warnings).
    pub fn warnings(&self) -> &[TreeWarning] {
        self.state.warnings()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Every leaf row, in committed order.
    pub fn all_leaf_children(&self) -> &[RowId] {
        self.root_node().all_leaf_children()
    }

    /// Top-level rows, in committed order.
    pub fn root_children(&self) -> &[RowId] {
        self.root_node().children_after_group()
    }

    /// Committed child rows of a group row. Empty for leaves.
    pub fn children_after_group(&self, row: RowId) -> &[RowId] {
        self.node_of(row)
            .map(TreeNode::children_after_group)
            .unwrap_or_default()
    }

    /// Committed leaf rows under a group row. Empty for leaves.
    pub fn leaf_children(&self, row: RowId) -> &[RowId] {
        self.node_of(row)
            .map(TreeNode::all_leaf_children)
            .unwrap_or_default()
    }

    /// Whether `row` is shown as a group.
    pub fn is_group(&self, row: RowId) -> bool {
        self.node_of(row)
            .is_some_and(|node| !node.children_after_group().is_empty())
    }

    /// Resolve a row handle.
    pub fn row(&self, row: RowId) -> Option<&RowRecord<D>> {
        self.state.tree.row(row)
    }

    /// Data row by id.
    pub fn row_by_id(&self, id: &str) -> Option<RowId> {
        self.state.row_by_id(id)
    }

    /// Node holding `row`.
    pub fn node_id_of(&self, row: RowId) -> Option<NodeId> {
        self.state.tree.row(row).and_then(RowRecord::tree_node)
    }

    fn node_of(&self, row: RowId) -> Option<&TreeNode> {
        self.node_id_of(row).and_then(|node| self.state.tree.node(node))
    }

    fn root_node(&self) -> &TreeNode {
        &self.state.tree.nodes[self.state.tree.root()]
    }

    /// Ids of `rows`, for display and tests.
    pub fn ids<'a>(&'a self, rows: &[RowId]) -> Vec<&'a str> {
        rows.iter()
            .filter_map(|&row| self.state.tree.row(row).map(RowRecord::id))
            .collect()
    }

    /// The underlying tree.
    pub fn tree(&self) -> &Tree<D> {
        &self.state.tree
    }

    /// Number of data rows, including rows left out of the tree.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    /// Whether the model holds no data rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether tree mode is on.
    pub fn tree_data(&self) -> bool {
        self.state.tree_data
    }

    /// Current ordering policy.
    pub fn order_policy(&self) -> OrderPolicy {
        self.state.policy
    }
}
