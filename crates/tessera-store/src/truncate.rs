// truncate.rs — Bulk replacement of subtrees from a stream of updates.
//
// Used to activate bundles: the update stream is first merged into a
// scratch tree, then each base path in the live tree is replaced by the
// matching part of the scratch tree (or removed when the stream had nothing
// for it). Everything outside the base paths is left alone.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::path::Path;
use crate::store::Store;
use crate::transaction::Transaction;
use crate::tree::{self, PatchOp};

/// One item of a bulk load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Update {
    /// A value to place at `path` in the scratch tree.
    Data { path: Path, value: Value },
    /// A policy to upsert.
    Policy { id: String, text: String },
}

impl Update {
    pub fn data(path: Path, value: Value) -> Self {
        Update::Data { path, value }
    }

    pub fn policy(id: impl Into<String>, text: impl Into<String>) -> Self {
        Update::Policy {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Which subtrees a truncate replaces. A root base path replaces the whole
/// tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TruncateParams {
    pub base_paths: Vec<Path>,
}

impl TruncateParams {
    pub fn new(base_paths: Vec<Path>) -> Self {
        Self { base_paths }
    }

    pub fn whole_tree() -> Self {
        Self {
            base_paths: vec![Path::root()],
        }
    }

    fn replaces_root(&self) -> bool {
        self.base_paths.iter().any(Path::is_root)
    }
}

impl Store {
    /// Replace the subtrees named by `params` with the merged contents of
    /// `updates`. Later updates win over earlier ones on conflicting keys;
    /// Objects are merged recursively.
    ///
    /// All data writes are ownership checked. Replacing the whole tree is
    /// refused while any data plugin holds a claim.
    pub async fn truncate<I>(
        &self,
        txn: &mut Transaction,
        params: TruncateParams,
        updates: I,
    ) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = Update>,
    {
        let mut payload = Value::Object(Map::new());
        let mut policies = Vec::new();
        for update in updates {
            match update {
                Update::Data { path, value } => tree::merge_insert(&mut payload, &path, value),
                Update::Policy { id, text } => policies.push((id, text)),
            }
        }

        if params.replaces_root() {
            if let Some((plugin, _)) = self.claimed_paths().into_iter().next() {
                return Err(StoreError::PathOwned {
                    plugin,
                    path: Path::root(),
                });
            }
            self.write_unchecked(txn, PatchOp::Add, &Path::root(), payload)
                .await?;
        } else {
            for base in &params.base_paths {
                self.truncate_base(txn, base, tree::get(&payload, base).cloned())
                    .await?;
            }
        }

        for (id, text) in policies {
            self.upsert_policy(txn, id, text).await?;
        }

        tracing::debug!(
            txn = txn.id(),
            base_paths = params.base_paths.len(),
            "truncate applied"
        );
        Ok(())
    }

    async fn truncate_base(
        &self,
        txn: &mut Transaction,
        base: &Path,
        value: Option<Value>,
    ) -> Result<(), StoreError> {
        match value {
            Some(value) => {
                self.check_ownership(base)?;
                if let Some(parent) = base.parent() {
                    self.make_dir(txn, &parent).await?;
                }
                self.write_unchecked(txn, PatchOp::Add, base, value).await
            }
            None => match self.read(txn, base).await {
                Ok(_) => self.write(txn, PatchOp::Remove, base, Value::Null).await,
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e),
            },
        }
    }
}
