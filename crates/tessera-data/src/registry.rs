// registry.rs — Data source kinds, selected by the `type` field of a plugin
// entry.
//
// Each kind contributes a SourceFactory that validates its own fields and
// returns a SourceConfig. A SourceConfig can build any number of Sources;
// every (re)start of a plugin builds a fresh one so no fetch state leaks
// across configurations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::DataError;
use crate::sources::{FileFactory, HttpFactory};

/// One running connection to an external system.
#[async_trait]
pub trait Source: Send {
    /// Fetch the next full snapshot. `None` means there is nothing new and
    /// the stored value must be left alone.
    async fn fetch(&mut self) -> Result<Option<Value>, DataError>;
}

/// Validated, kind-specific configuration of one plugin.
pub trait SourceConfig: Send + Sync + fmt::Debug {
    fn new_source(&self) -> Result<Box<dyn Source>, DataError>;
}

/// Validates raw entries of one kind.
pub trait SourceFactory: Send + Sync {
    /// The `type` value this factory answers to.
    fn kind(&self) -> &'static str;

    /// Interval used when an entry sets no `polling_interval`.
    fn default_interval(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Smallest accepted `polling_interval`.
    fn min_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// Check the kind-specific fields of an entry. `raw` no longer contains
    /// the common fields (`type`, `polling_interval`, `rego_transform`).
    fn validate(&self, raw: &Map<String, Value>) -> Result<Arc<dyn SourceConfig>, DataError>;
}

/// Factories by kind.
#[derive(Default, Clone)]
pub struct Registry {
    factories: BTreeMap<&'static str, Arc<dyn SourceFactory>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `file` and `http` kinds.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.factories.insert("file", Arc::new(FileFactory));
        registry.factories.insert("http", Arc::new(HttpFactory));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn SourceFactory>) -> Result<(), DataError> {
        let kind = factory.kind();
        if self.factories.contains_key(kind) {
            return Err(DataError::DuplicateKind {
                kind: kind.to_string(),
            });
        }
        tracing::debug!(kind, "data source kind registered");
        self.factories.insert(kind, factory);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn SourceFactory>> {
        self.factories.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("kinds", &self.kinds()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_kinds() {
        let registry = Registry::with_builtin();
        assert_eq!(registry.kinds(), vec!["file", "http"]);
        assert!(registry.get("file").is_some());
        assert!(registry.get("kafka").is_none());
    }

    #[test]
    fn duplicate_kind_rejected() {
        let mut registry = Registry::with_builtin();
        let err = registry.register(Arc::new(FileFactory)).unwrap_err();
        assert!(matches!(err, DataError::DuplicateKind { ref kind } if kind == "file"));
    }
}
