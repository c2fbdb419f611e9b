//! Configuration for the tree row model.

use std::fmt;
use std::sync::Arc;

use crate::error::ConfigError;

/// Derives a row id from a data object.
pub type RowIdFn<D> = Box<dyn Fn(&D) -> String>;

/// Derives the group path of a data object. The row lands on the last
/// segment; an empty path excludes the row from the tree.
pub type PathFn<D> = Box<dyn Fn(&D) -> Vec<String>>;

/// Returns the nested children of a data object, if it has any.
pub type ChildrenFn<D> = Box<dyn for<'a> Fn(&'a D) -> Option<&'a [Arc<D>]>>;

/// Where the hierarchy comes from when tree mode is enabled.
pub enum TreeSource<D> {
    /// No hierarchy; rows are keyed by id under the root.
    None,
    /// Explicit path per row.
    Path(PathFn<D>),
    /// Nested children embedded in each data object.
    Children(ChildrenFn<D>),
}

impl<D> TreeSource<D> {
    fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Path(_) => "path",
            Self::Children(_) => "children",
        }
    }
}

/// How sibling order is decided on commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderPolicy {
    /// Follow the order of the incoming data (source row index).
    #[default]
    TrustSource,
    /// Keep the order committed last time; new rows go after existing ones.
    MaintainPrior,
}

/// Configuration for [`TreeRowModel`](crate::TreeRowModel).
pub struct TreeConfig<D> {
    /// Row id callback. Without it rows get sequential ids and are matched by
    /// data reference.
    pub row_id: Option<RowIdFn<D>>,
    /// Hierarchy source used while `tree_data` is enabled.
    pub source: TreeSource<D>,
    /// Build the hierarchy. When disabled every row is a root-level leaf.
    pub tree_data: bool,
    /// Sibling ordering policy.
    pub order: OrderPolicy,
    /// Capacity hint for the node and row arenas.
    pub initial_capacity: usize,
}

impl<D> Default for TreeConfig<D> {
    fn default() -> Self {
        Self {
            row_id: None,
            source: TreeSource::None,
            tree_data: false,
            order: OrderPolicy::TrustSource,
            initial_capacity: 1024,
        }
    }
}

impl<D> TreeConfig<D> {
    /// Flat configuration: rows keyed by id under the root.
    pub fn flat() -> Self {
        Self::default()
    }

    /// Tree data from an explicit path per row.
    pub fn path(path: impl Fn(&D) -> Vec<String> + 'static) -> Self {
        Self {
            source: TreeSource::Path(Box::new(path)),
            tree_data: true,
            ..Self::default()
        }
    }

    /// Tree data from nested children.
    pub fn children(children: impl for<'a> Fn(&'a D) -> Option<&'a [Arc<D>]> + 'static) -> Self {
        Self {
            source: TreeSource::Children(Box::new(children)),
            tree_data: true,
            ..Self::default()
        }
    }

    /// Set the row id callback.
    pub fn with_row_id(mut self, row_id: impl Fn(&D) -> String + 'static) -> Self {
        self.row_id = Some(Box::new(row_id));
        self
    }

    /// Enable or disable tree mode.
    pub fn with_tree_data(mut self, tree_data: bool) -> Self {
        self.tree_data = tree_data;
        self
    }

    /// Keep prior sibling order instead of following the incoming data.
    pub fn with_maintain_order(mut self, maintain: bool) -> Self {
        self.order = if maintain {
            OrderPolicy::MaintainPrior
        } else {
            OrderPolicy::TrustSource
        };
        self
    }

    /// Capacity hint for the arenas.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Check the configuration once, before any row is processed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tree_data && matches!(self.source, TreeSource::None) {
            return Err(ConfigError::MissingTreeSource);
        }
        Ok(())
    }
}

impl<D> fmt::Debug for TreeConfig<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeConfig")
            .field("row_id", &self.row_id.is_some())
            .field("source", &self.source.name())
            .field("tree_data", &self.tree_data)
            .field("order", &self.order)
            .field("initial_capacity", &self.initial_capacity)
            .finish()
    }
}
