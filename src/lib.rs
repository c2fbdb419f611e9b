//! # rowtree
//!
//! Incremental tree row model for data grids.
//!
//! A flat (or nested) dataset is mapped onto a secondary tree of
//! [`TreeNode`]s, one per distinct key at each level: row grouping, tree data
//! from explicit paths, or tree data from nested children. Mutations only mark
//! the touched nodes; a commit then rebuilds `children_after_group` and
//! `all_leaf_children` bottom-up for the invalidated branches alone.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rowtree::{RowTransaction, TreeConfig, TreeRowModel};
//!
//! struct Row {
//!     id: u32,
//!     group: &'static str,
//! }
//!
//! let config = TreeConfig::path(|r: &Row| vec![r.group.to_string(), r.id.to_string()])
//!     .with_row_id(|r: &Row| r.id.to_string());
//! let mut model = TreeRowModel::new(config).unwrap();
//!
//! model.set_row_data(&[
//!     Arc::new(Row { id: 1, group: "A" }),
//!     Arc::new(Row { id: 2, group: "A" }),
//!     Arc::new(Row { id: 3, group: "B" }),
//! ]);
//! assert_eq!(model.ids(model.all_leaf_children()), ["1", "2", "3"]);
//!
//! model.apply_transaction(RowTransaction::new().update([Arc::new(Row { id: 2, group: "B" })]));
//! assert_eq!(model.ids(model.all_leaf_children()), ["1", "3", "2"]);
//! ```

mod arena;
mod commit;
mod config;
mod error;
mod manager;
mod model;
mod node;
mod row;
mod transaction;
mod tree;

pub use arena::{Arena, ArenaKey, NodeId, RowId};
pub use commit::{ChangedPath, CommitOutcome};
pub use config::{ChildrenFn, OrderPolicy, PathFn, RowIdFn, TreeConfig, TreeSource};
pub use error::{ConfigError, TreeWarning};
pub use model::TreeRowModel;
pub use node::{NodeKind, TreeNode};
pub use row::{RowKind, RowRecord, GROUP_ROW_ID_PREFIX};
pub use transaction::{RowTransaction, TransactionResult};
pub use tree::{Children, Tree};

#[cfg(test)]
mod proptests;
