// error.rs — Error types for the document store.

use thiserror::Error;

use crate::path::Path;

/// Errors that can occur during store operations.
///
/// Every variant is returned synchronously to the caller that attempted the
/// operation. The caller is expected to abort its own transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No value exists at the requested path.
    #[error("document not found at {path}")]
    NotFound { path: Path },

    /// The transaction handle belongs to another store, or the operation
    /// requires a write transaction and got a read transaction.
    #[error("invalid transaction: {reason}")]
    InvalidTransaction { reason: String },

    /// The patch would break the shape of the tree (non-Object root, root
    /// removal, or a write through a non-Object ancestor).
    #[error("write conflict at {path}: {reason}")]
    WriteConflict { path: Path, reason: String },

    /// The path equals or is nested under a path claimed by a data plugin.
    #[error("path {path} is owned by data plugin \"{plugin}\"")]
    PathOwned { plugin: String, path: Path },

    /// A path string could not be parsed into segments.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// No policy with the given id is stored.
    #[error("policy not found: {id}")]
    PolicyNotFound { id: String },
}

impl StoreError {
    pub(crate) fn not_found(path: &Path) -> Self {
        StoreError::NotFound { path: path.clone() }
    }

    pub(crate) fn conflict(path: &Path, reason: impl Into<String>) -> Self {
        StoreError::WriteConflict {
            path: path.clone(),
            reason: reason.into(),
        }
    }

    /// True when this error means "nothing stored there".
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
