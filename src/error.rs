//! Configuration errors and data warnings.
//!
//! Bad configuration is the only hard failure. Problems in the row data are
//! resolved locally (first row wins, offending rows are excluded) and reported
//! as [`TreeWarning`]s.

use thiserror::Error;

/// Invalid configuration, detected once when the model is configured.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Tree mode was enabled without a path function or children accessor.
    #[error("tree data is enabled but neither a path function nor a children accessor is configured")]
    MissingTreeSource,
}

/// A recoverable problem found in the row data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeWarning {
    /// Two rows resolved to the same id. The first one is kept.
    #[error("duplicate row id {id:?}; keeping the first row")]
    DuplicateRowId {
        /// The repeated id.
        id: String,
    },

    /// Two rows resolved to the same path. The row with the smallest source
    /// index is shown; the others are tracked as duplicates.
    #[error("duplicate group path {path:?} for row {id:?}")]
    DuplicatePath {
        /// Row that became a duplicate.
        id: String,
        /// The shared path.
        path: Vec<String>,
    },

    /// The path function returned no segments; the row is left out of the
    /// tree.
    #[error("row {id:?} has an empty group path and is excluded from the tree")]
    EmptyPath {
        /// Excluded row.
        id: String,
    },

    /// The same data object was reached twice through nested children. The
    /// second occurrence and its subtree are skipped.
    #[error("data object for row {id:?} appears more than once in the nested children")]
    DuplicateDataObject {
        /// Id of the repeated object.
        id: String,
    },

    /// A transaction tried to add a row whose id already exists.
    #[error("cannot add row {id:?}: a row with this id already exists")]
    DuplicateAdd {
        /// The existing id.
        id: String,
    },
}

impl TreeWarning {
    /// Id of the row the warning is about.
    pub fn row_id(&self) -> &str {
        match self {
            Self::DuplicateRowId { id }
            | Self::DuplicatePath { id, .. }
            | Self::EmptyPath { id }
            | Self::DuplicateDataObject { id }
            | Self::DuplicateAdd { id } => id,
        }
    }
}
