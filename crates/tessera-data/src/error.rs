// error.rs — Error types for data plugins, their registry and orchestrator.

use std::path::PathBuf;

use thiserror::Error;

use tessera_store::StoreError;

/// Errors that can occur while validating, starting, or running data plugins.
#[derive(Debug, Error)]
pub enum DataError {
    /// The configuration is not an object of plugin entries.
    #[error("malformed data plugin configuration: {reason}")]
    Malformed { reason: String },

    /// Two configured plugin paths are equal or nested.
    #[error("data plugin paths overlap: \"{first}\" and \"{second}\"")]
    PathOverlap { first: String, second: String },

    /// A plugin names a `type` that no factory is registered for.
    #[error("data plugin \"{plugin}\" has unknown type \"{kind}\"")]
    UnknownKind { plugin: String, kind: String },

    /// A factory with the same kind is already registered.
    #[error("a data source factory for type \"{kind}\" is already registered")]
    DuplicateKind { kind: String },

    /// A plugin entry failed validation.
    #[error("invalid configuration for data plugin \"{plugin}\": {reason}")]
    InvalidConfig { plugin: String, reason: String },

    /// A single configuration field is missing or malformed. Factories
    /// return this; validation wraps it in `InvalidConfig`.
    #[error("field \"{field}\": {reason}")]
    Field { field: String, reason: String },

    /// A transform rule reference is malformed or cannot be prepared.
    #[error("transform rule \"{rule}\": {reason}")]
    Rule { rule: String, reason: String },

    /// Evaluating a prepared transform failed.
    #[error("transform {rule} failed: {reason}")]
    Transform { rule: String, reason: String },

    /// A source could not produce a batch.
    #[error("fetch failed: {reason}")]
    Fetch { reason: String },

    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The store rejected an operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DataError {
    pub(crate) fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        DataError::Field {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn fetch(reason: impl Into<String>) -> Self {
        DataError::Fetch {
            reason: reason.into(),
        }
    }
}
