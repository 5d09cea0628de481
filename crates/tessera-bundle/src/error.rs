// error.rs — Error types for bundle loading and activation.

use std::path::PathBuf;

use thiserror::Error;

use tessera_store::StoreError;

/// Errors that can occur while loading, validating, or activating bundles.
#[derive(Debug, Error)]
pub enum BundleError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A manifest or data file could not be parsed.
    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// A manifest root is not a valid path.
    #[error("bundle '{bundle}' has an invalid root '{root}': {reason}")]
    InvalidRoot {
        bundle: String,
        root: String,
        reason: String,
    },

    /// Two roots (of the same bundle or of two bundles activated together)
    /// overlap.
    #[error("bundle '{first}' root '{first_root}' overlaps bundle '{second}' root '{second_root}'")]
    RootOverlap {
        first: String,
        first_root: String,
        second: String,
        second_root: String,
    },

    /// The bundle carries data that no manifest root covers.
    #[error("bundle '{bundle}' has data at {path} outside its declared roots")]
    OutsideRoots { bundle: String, path: String },

    /// Deactivation named a bundle that is not active.
    #[error("bundle '{name}' is not active")]
    NotActive { name: String },

    /// The store rejected an operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}
