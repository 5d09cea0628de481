// store.rs — Store: the single-writer, many-reader document store.
//
// Locking model:
//
//   writer: Mutex<()>        one write transaction admitted at a time
//   state:  RwLock<State>    shared by read transactions; taken exclusively
//                            only while a commit installs its changes and
//                            runs the triggers
//
// A write transaction holds the writer mutex from `new_transaction` until it
// finishes. Its changes go to a private staged copy, so readers keep seeing
// the last committed state and may come and go freely while the writer is
// open. Commit takes the exclusive lock (waiting for current readers), swaps
// the staged state in, runs every trigger, releases the exclusive lock and
// finally the writer mutex. tokio's RwLock is fair, so readers arriving
// after the commit started queue behind it.
//
// The claimed-path registry and the trigger list are owned here and guarded
// by their own short-lived locks; they are only reachable through Store
// methods.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};

use crate::error::StoreError;
use crate::path::Path;
use crate::transaction::{Mode, Transaction, TransactionParams, WriteState};
use crate::tree::{self, PatchOp};
use crate::trigger::{CommitView, DataEvent, PolicyEvent, Trigger, TriggerEvent, TriggerHandle};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Committed contents of a store: the data tree and the policy texts.
#[derive(Debug, Clone)]
pub(crate) struct State {
    pub(crate) data: Value,
    pub(crate) policies: BTreeMap<String, String>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            data: Value::Object(Map::new()),
            policies: BTreeMap::new(),
        }
    }
}

/// In-memory transactional document store. Share it as `Arc<Store>`.
pub struct Store {
    id: u64,
    state: Arc<RwLock<State>>,
    writer: Arc<Mutex<()>>,
    next_txn: AtomicU64,
    triggers: parking_lot::Mutex<BTreeMap<u64, Arc<dyn Trigger>>>,
    next_trigger: AtomicU64,
    /// plugin name → claimed path
    claims: parking_lot::RwLock<BTreeMap<String, Path>>,
}

impl Store {
    /// Create an empty store (root is `{}`).
    pub fn new() -> Self {
        Self::with_data(Map::new())
    }

    /// Create a store whose root is `data`.
    pub fn with_data(data: Map<String, Value>) -> Self {
        Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(RwLock::new(State {
                data: Value::Object(data),
                policies: BTreeMap::new(),
            })),
            writer: Arc::new(Mutex::new(())),
            next_txn: AtomicU64::new(1),
            triggers: parking_lot::Mutex::new(BTreeMap::new()),
            next_trigger: AtomicU64::new(1),
            claims: parking_lot::RwLock::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    // ── Transactions ────────────────────────────────────────────────

    /// Open a transaction. A write transaction waits until no other write
    /// transaction is open; a read transaction waits only while a commit is
    /// installing its changes.
    pub async fn new_transaction(&self, params: TransactionParams) -> Transaction {
        let mode = if params.write {
            let writer = Arc::clone(&self.writer).lock_owned().await;
            Mode::Write(WriteState {
                writer,
                staged: None,
                event: TriggerEvent::default(),
            })
        } else {
            Mode::Read(Arc::clone(&self.state).read_owned().await)
        };
        let id = self.next_txn.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(txn = id, write = params.write, "transaction opened");
        Transaction {
            id,
            store_id: self.id,
            mode,
        }
    }

    /// Read the value at `path`. Write transactions see their own changes.
    pub async fn read(&self, txn: &Transaction, path: &Path) -> Result<Value, StoreError> {
        self.check_txn(txn)?;
        match &txn.mode {
            Mode::Read(state) => lookup(&state.data, path),
            Mode::Write(WriteState {
                staged: Some(state),
                ..
            }) => lookup(&state.data, path),
            Mode::Write(_) => {
                let state = self.state.read().await;
                lookup(&state.data, path)
            }
        }
    }

    /// Apply a patch, rejecting paths claimed by a data plugin.
    pub async fn write(
        &self,
        txn: &mut Transaction,
        op: PatchOp,
        path: &Path,
        value: Value,
    ) -> Result<(), StoreError> {
        self.check_ownership(path)?;
        self.write_unchecked(txn, op, path, value).await
    }

    /// Apply a patch without the ownership check. Reserved for the plugin
    /// that owns the path and for the orchestrator tearing a plugin down.
    pub async fn write_unchecked(
        &self,
        txn: &mut Transaction,
        op: PatchOp,
        path: &Path,
        value: Value,
    ) -> Result<(), StoreError> {
        let (state, event) = self.stage(txn).await?;
        let recorded = if op == PatchOp::Remove {
            Value::Null
        } else {
            value.clone()
        };
        tree::apply(&mut state.data, op, path, value)?;
        event.data.push(DataEvent {
            path: path.clone(),
            op,
            value: recorded,
        });
        Ok(())
    }

    /// Ensure `path` and all its ancestors exist as Objects.
    pub async fn make_dir(&self, txn: &mut Transaction, path: &Path) -> Result<(), StoreError> {
        let (state, event) = self.stage(txn).await?;
        if tree::make_dir(&mut state.data, path)? {
            event.data.push(DataEvent {
                path: path.clone(),
                op: PatchOp::Add,
                value: Value::Object(Map::new()),
            });
        }
        Ok(())
    }

    /// Finish a transaction. For a write transaction this installs its
    /// changes and runs every trigger before any reader or the next writer
    /// can proceed.
    pub async fn commit(&self, txn: Transaction) -> Result<(), StoreError> {
        self.check_txn(&txn)?;
        let txn_id = txn.id;
        let write = match txn.mode {
            Mode::Read(guard) => {
                drop(guard);
                return Ok(());
            }
            Mode::Write(write) => write,
        };

        let WriteState {
            writer,
            staged,
            mut event,
        } = write;

        event.txn_id = txn_id;
        let mut exclusive = self.state.write().await;
        if let Some(staged) = staged {
            *exclusive = staged;
        }

        // Every write commit fires the triggers, even one that changed
        // nothing.
        let triggers: Vec<Arc<dyn Trigger>> = self.triggers.lock().values().cloned().collect();
        let view = CommitView { state: &*exclusive };
        for trigger in &triggers {
            trigger.on_commit(&view, &event);
        }
        tracing::debug!(
            txn = txn_id,
            data_events = event.data.len(),
            policy_events = event.policy.len(),
            triggers = triggers.len(),
            "transaction committed"
        );
        drop(exclusive);
        drop(writer);
        Ok(())
    }

    /// Discard a transaction's changes and release its lock.
    pub fn abort(&self, txn: Transaction) {
        tracing::trace!(txn = txn.id, "transaction aborted");
        drop(txn);
    }

    // ── Triggers ────────────────────────────────────────────────────

    /// Register a commit trigger. Requires a write transaction so that
    /// registration is serialized with commits.
    pub fn register(
        &self,
        txn: &Transaction,
        trigger: impl Trigger + 'static,
    ) -> Result<TriggerHandle, StoreError> {
        self.check_write_txn(txn, "trigger registration requires a write transaction")?;
        let id = self.next_trigger.fetch_add(1, Ordering::Relaxed);
        self.triggers.lock().insert(id, Arc::new(trigger));
        Ok(TriggerHandle {
            store_id: self.id,
            id,
        })
    }

    /// Remove a previously registered trigger. Unknown handles are ignored.
    pub fn unregister(&self, txn: &Transaction, handle: TriggerHandle) -> Result<(), StoreError> {
        self.check_write_txn(txn, "trigger removal requires a write transaction")?;
        if handle.store_id != self.id {
            return Err(StoreError::InvalidTransaction {
                reason: "trigger handle belongs to another store".to_string(),
            });
        }
        self.triggers.lock().remove(&handle.id);
        Ok(())
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.lock().len()
    }

    // ── Policies ────────────────────────────────────────────────────

    /// Ids of all stored policies, sorted.
    pub async fn list_policies(&self, txn: &Transaction) -> Result<Vec<String>, StoreError> {
        self.with_state(txn, |state| Ok(state.policies.keys().cloned().collect()))
            .await
    }

    pub async fn get_policy(&self, txn: &Transaction, id: &str) -> Result<String, StoreError> {
        self.with_state(txn, |state| {
            state
                .policies
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::PolicyNotFound { id: id.to_string() })
        })
        .await
    }

    pub async fn upsert_policy(
        &self,
        txn: &mut Transaction,
        id: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), StoreError> {
        let id = id.into();
        let (state, event) = self.stage(txn).await?;
        state.policies.insert(id.clone(), text.into());
        event.policy.push(PolicyEvent { id, removed: false });
        Ok(())
    }

    pub async fn delete_policy(&self, txn: &mut Transaction, id: &str) -> Result<(), StoreError> {
        let (state, event) = self.stage(txn).await?;
        if state.policies.remove(id).is_none() {
            return Err(StoreError::PolicyNotFound { id: id.to_string() });
        }
        event.policy.push(PolicyEvent {
            id: id.to_string(),
            removed: true,
        });
        Ok(())
    }

    // ── Claimed paths ───────────────────────────────────────────────

    /// Record that `plugin` owns `path`. Overlap between claims is checked
    /// when configuration is validated, not here.
    pub fn claim_path(&self, plugin: impl Into<String>, path: Path) {
        let plugin = plugin.into();
        tracing::debug!(plugin = %plugin, path = %path, "path claimed");
        self.claims.write().insert(plugin, path);
    }

    /// Drop `plugin`'s claim. Returns the path it held, if any.
    pub fn release_path(&self, plugin: &str) -> Option<Path> {
        let released = self.claims.write().remove(plugin);
        if let Some(path) = &released {
            tracing::debug!(plugin = %plugin, path = %path, "path released");
        }
        released
    }

    pub fn release_all(&self) {
        self.claims.write().clear();
    }

    pub fn claimed_paths(&self) -> BTreeMap<String, Path> {
        self.claims.read().clone()
    }

    /// The plugin whose claim covers `path` (equal to, or an ancestor of it).
    pub fn owner_of(&self, path: &Path) -> Option<(String, Path)> {
        self.claims
            .read()
            .iter()
            .find(|(_, claimed)| path.has_prefix(claimed))
            .map(|(plugin, claimed)| (plugin.clone(), claimed.clone()))
    }

    pub(crate) fn check_ownership(&self, path: &Path) -> Result<(), StoreError> {
        match self.owner_of(path) {
            Some((plugin, _)) => Err(StoreError::PathOwned {
                plugin,
                path: path.clone(),
            }),
            None => Ok(()),
        }
    }

    // ── One-shot helpers ────────────────────────────────────────────

    /// Read a single value in its own read transaction.
    pub async fn read_one(&self, path: &Path) -> Result<Value, StoreError> {
        let txn = self.new_transaction(TransactionParams::read()).await;
        let result = self.read(&txn, path).await;
        self.commit(txn).await?;
        result
    }

    /// Apply a single checked patch in its own write transaction. This is
    /// the path external writers (an HTTP data API, for example) go through.
    pub async fn write_one(&self, op: PatchOp, path: &Path, value: Value) -> Result<(), StoreError> {
        let mut txn = self.new_transaction(TransactionParams::write()).await;
        if let Err(e) = self.write(&mut txn, op, path, value).await {
            self.abort(txn);
            return Err(e);
        }
        self.commit(txn).await
    }

    // ── Internals ───────────────────────────────────────────────────

    fn check_txn(&self, txn: &Transaction) -> Result<(), StoreError> {
        if txn.store_id != self.id {
            return Err(StoreError::InvalidTransaction {
                reason: format!(
                    "transaction {} belongs to store {}, not store {}",
                    txn.id, txn.store_id, self.id
                ),
            });
        }
        Ok(())
    }

    fn check_write_txn(&self, txn: &Transaction, reason: &str) -> Result<(), StoreError> {
        self.check_txn(txn)?;
        if !txn.is_write() {
            return Err(StoreError::InvalidTransaction {
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    /// The staged state of a write transaction, created from the committed
    /// state on first use.
    pub(crate) async fn stage<'t>(
        &self,
        txn: &'t mut Transaction,
    ) -> Result<(&'t mut State, &'t mut TriggerEvent), StoreError> {
        self.check_write_txn(txn, "cannot write in a read transaction")?;
        let Mode::Write(write) = &mut txn.mode else {
            return Err(StoreError::InvalidTransaction {
                reason: "cannot write in a read transaction".to_string(),
            });
        };
        let WriteState { staged, event, .. } = write;
        let state = match staged {
            Some(state) => state,
            slot @ None => slot.insert(self.state.read().await.clone()),
        };
        Ok((state, event))
    }

    async fn with_state<T>(
        &self,
        txn: &Transaction,
        f: impl FnOnce(&State) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.check_txn(txn)?;
        match &txn.mode {
            Mode::Read(state) => f(state),
            Mode::Write(WriteState {
                staged: Some(state),
                ..
            }) => f(state),
            Mode::Write(_) => {
                let state = self.state.read().await;
                f(&state)
            }
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup(root: &Value, path: &Path) -> Result<Value, StoreError> {
    tree::get(root, path)
        .cloned()
        .ok_or_else(|| StoreError::not_found(path))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::path;

    #[tokio::test]
    async fn write_then_read_own_changes() {
        let store = Store::new();
        let mut txn = store.new_transaction(TransactionParams::write()).await;
        store
            .write(&mut txn, PatchOp::Add, &path!["a"], json!({"b": 1}))
            .await
            .unwrap();
        assert_eq!(store.read(&txn, &path!["a", "b"]).await.unwrap(), json!(1));
        store.commit(txn).await.unwrap();
        assert_eq!(store.read_one(&path!["a", "b"]).await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn foreign_transaction_is_rejected() {
        let a = Store::new();
        let b = Store::new();
        let txn = a.new_transaction(TransactionParams::read()).await;
        let err = b.read(&txn, &Path::root()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransaction { .. }));
        a.commit(txn).await.unwrap();
    }

    #[tokio::test]
    async fn read_transaction_cannot_write_or_register() {
        let store = Store::new();
        let mut txn = store.new_transaction(TransactionParams::read()).await;
        let err = store
            .write(&mut txn, PatchOp::Add, &path!["a"], json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransaction { .. }));
        let err = store.register(&txn, |_: &CommitView<'_>, _: &TriggerEvent| {});
        assert!(matches!(err, Err(StoreError::InvalidTransaction { .. })));
        store.abort(txn);
    }

    #[tokio::test]
    async fn ownership_check_covers_nested_paths() {
        let store = Store::new();
        store.claim_path("git", path!["git", "placeholder"]);
        for p in [
            path!["git", "placeholder"],
            path!["git", "placeholder", "x"],
            path!["git", "placeholder", "x", "y", "z"],
        ] {
            let err = store.write_one(PatchOp::Add, &p, json!(1)).await.unwrap_err();
            assert_eq!(
                err,
                StoreError::PathOwned {
                    plugin: "git".to_string(),
                    path: p.clone()
                }
            );
        }
        // A sibling is not owned.
        store.write_one(PatchOp::Add, &path!["other"], json!(1)).await.unwrap();
        assert_eq!(
            store.owner_of(&path!["git", "placeholder", "a"]).map(|(n, _)| n),
            Some("git".to_string())
        );
        assert_eq!(store.release_path("git"), Some(path!["git", "placeholder"]));
        assert!(store.claimed_paths().is_empty());
    }

    #[tokio::test]
    async fn owned_path_error_message_names_plugin() {
        let store = Store::new();
        store.claim_path("kafka.updates", path!["kafka", "updates"]);
        let err = store
            .write_one(PatchOp::Add, &path!["kafka", "updates", "k"], json!(1))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "path /kafka/updates/k is owned by data plugin \"kafka.updates\""
        );
    }

    #[tokio::test]
    async fn policies_are_transactional() {
        let store = Store::new();
        let mut txn = store.new_transaction(TransactionParams::write()).await;
        store.upsert_policy(&mut txn, "authz.rego", "package authz").await.unwrap();
        assert_eq!(store.list_policies(&txn).await.unwrap(), vec!["authz.rego"]);
        store.abort(txn);

        let txn = store.new_transaction(TransactionParams::read()).await;
        assert!(store.list_policies(&txn).await.unwrap().is_empty());
        assert!(matches!(
            store.get_policy(&txn, "authz.rego").await,
            Err(StoreError::PolicyNotFound { .. })
        ));
        store.commit(txn).await.unwrap();

        let mut txn = store.new_transaction(TransactionParams::write()).await;
        assert!(store.delete_policy(&mut txn, "missing").await.is_err());
        store.abort(txn);
    }

    #[tokio::test]
    async fn unregistered_trigger_stops_firing() {
        let store = Store::new();
        let fired = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&fired);

        let txn = store.new_transaction(TransactionParams::write()).await;
        let handle = store
            .register(&txn, move |_: &CommitView<'_>, _: &TriggerEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        store.commit(txn).await.unwrap();

        // The registering commit already fires it.
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        store.write_one(PatchOp::Add, &path!["a"], json!(1)).await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        let txn = store.new_transaction(TransactionParams::write()).await;
        store.unregister(&txn, handle).unwrap();
        store.commit(txn).await.unwrap();
        assert_eq!(store.trigger_count(), 0);

        store.write_one(PatchOp::Add, &path!["b"], json!(1)).await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
