// plugin.rs — One data plugin instance and its poll loop.
//
// Each instance owns one tree path. While running, a background task ticks
// on the configured interval (the first tick runs immediately):
//
//   fetch ─► [transform] ─► write txn { make_dir(parent); Add(path) } ─► commit
//
// A tick that fails is logged and the loop carries on with the next one.
// Shutdown uses two one-shot channels: `exit` tells the loop to finish and is
// only observed between ticks, `done` is the loop's acknowledgement.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use tessera_store::{PatchOp, Path, Store, StoreError, Transaction, TransactionParams, TriggerEvent};

use crate::config::Entry;
use crate::error::DataError;
use crate::registry::Source;
use crate::transform::{RuleRef, Transform, TransformEngine};

/// Where an instance is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Constructed, never started.
    NotReady,
    /// Waiting for the next tick.
    Polling,
    Fetching,
    Transforming,
    Ingesting,
    /// Exit requested; the loop is winding down.
    Draining,
    Stopped,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginState::NotReady => "not_ready",
            PluginState::Polling => "polling",
            PluginState::Fetching => "fetching",
            PluginState::Transforming => "transforming",
            PluginState::Ingesting => "ingesting",
            PluginState::Draining => "draining",
            PluginState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Shared handles every plugin needs.
#[derive(Clone)]
pub struct PluginContext {
    pub store: Arc<Store>,
    pub engine: Arc<dyn TransformEngine>,
    pub status: Arc<crate::status::StatusRegistry>,
}

/// A prepared transform, dropped when policies change.
pub(crate) struct TransformSlot {
    rule: RuleRef,
    engine: Arc<dyn TransformEngine>,
    prepared: Mutex<Option<Arc<dyn Transform>>>,
}

impl TransformSlot {
    fn new(rule: RuleRef, engine: Arc<dyn TransformEngine>) -> Self {
        Self {
            rule,
            engine,
            prepared: Mutex::new(None),
        }
    }

    fn prepare(&self) -> Result<Arc<dyn Transform>, DataError> {
        let transform = self.engine.prepare(&self.rule)?;
        *self.prepared.lock() = Some(Arc::clone(&transform));
        Ok(transform)
    }

    fn current(&self) -> Result<Arc<dyn Transform>, DataError> {
        let cached = self.prepared.lock().clone();
        match cached {
            Some(transform) => Ok(transform),
            None => self.prepare(),
        }
    }

    fn mark_stale(&self) {
        *self.prepared.lock() = None;
    }

    fn is_prepared(&self) -> bool {
        self.prepared.lock().is_some()
    }
}

/// The part of a plugin that runs inside store commits. Cheap to clone and
/// never blocks on the plugin's loop.
#[derive(Clone, Default)]
pub struct PostCommitHook {
    transform: Option<Arc<TransformSlot>>,
}

impl PostCommitHook {
    pub fn on_commit(&self, event: &TriggerEvent) {
        if let Some(slot) = &self.transform {
            if event.policy_changed() && slot.is_prepared() {
                tracing::debug!(rule = %slot.rule, "policies changed; transform will be prepared again");
                slot.mark_stale();
            }
        }
    }
}

struct Running {
    exit_tx: oneshot::Sender<()>,
    done_rx: oneshot::Receiver<()>,
    task: JoinHandle<()>,
}

/// One configured data plugin.
pub struct DataPlugin {
    entry: Entry,
    ctx: PluginContext,
    state: Arc<watch::Sender<PluginState>>,
    hook: PostCommitHook,
    running: Option<Running>,
}

impl DataPlugin {
    /// Construct a plugin. Nothing runs until [`DataPlugin::start`].
    pub fn new(entry: Entry, ctx: PluginContext) -> Self {
        let (state, _) = watch::channel(PluginState::NotReady);
        Self {
            entry,
            ctx,
            state: Arc::new(state),
            hook: PostCommitHook::default(),
            running: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn path(&self) -> &Path {
        &self.entry.path
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn state(&self) -> PluginState {
        *self.state.borrow()
    }

    /// Follow state changes.
    pub fn subscribe(&self) -> watch::Receiver<PluginState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn hook(&self) -> PostCommitHook {
        self.hook.clone()
    }

    /// Prepare the transform (if any), create the owned path, and spawn the
    /// poll loop. Returns once setup is done.
    pub async fn start(&mut self) -> Result<(), DataError> {
        if self.running.is_some() {
            return Ok(());
        }

        let slot = match &self.entry.transform {
            Some(rule) => {
                let slot = Arc::new(TransformSlot::new(rule.clone(), Arc::clone(&self.ctx.engine)));
                slot.prepare()?;
                Some(slot)
            }
            None => None,
        };

        let store = &self.ctx.store;
        let mut txn = store.new_transaction(TransactionParams::write()).await;
        if let Err(e) = prepare_path(store, &mut txn, &self.entry.path).await {
            store.abort(txn);
            return Err(e.into());
        }
        store.commit(txn).await?;

        let source = self.entry.source.new_source()?;
        let (exit_tx, exit_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let worker = Worker {
            name: self.entry.name.clone(),
            path: self.entry.path.clone(),
            interval: self.entry.interval,
            store: Arc::clone(&self.ctx.store),
            transform: slot.clone(),
            source,
            state: Arc::clone(&self.state),
        };
        let task = tokio::spawn(worker.run(exit_rx, done_tx));

        self.hook = PostCommitHook { transform: slot };
        self.running = Some(Running {
            exit_tx,
            done_rx,
            task,
        });
        tracing::info!(
            plugin = %self.entry.name,
            path = %self.entry.path,
            kind = %self.entry.kind,
            interval = ?self.entry.interval,
            "data plugin started"
        );
        Ok(())
    }

    /// Ask the loop to exit and wait up to `timeout` for it to acknowledge.
    /// On timeout the loop is left to finish in the background.
    pub async fn stop(&mut self, timeout: Duration) {
        let Some(running) = self.running.take() else {
            return;
        };
        // The loop may already be gone (panicked); then the send fails and
        // `done` resolves immediately.
        let _ = running.exit_tx.send(());
        match tokio::time::timeout(timeout, running.done_rx).await {
            Ok(_) => {
                tracing::info!(plugin = %self.entry.name, "data plugin stopped");
            }
            Err(_) => {
                tracing::warn!(
                    plugin = %self.entry.name,
                    timeout = ?timeout,
                    "data plugin did not stop in time; it will finish in the background"
                );
                drop(running.task);
            }
        }
        self.hook = PostCommitHook::default();
        self.state.send_replace(PluginState::Stopped);
    }

    /// Apply a new entry for the same key. Identical configuration is a
    /// no-op; anything else restarts the instance.
    pub async fn reconfigure(&mut self, next: Entry, timeout: Duration) -> Result<(), DataError> {
        if self.entry.same_config(&next) {
            tracing::debug!(plugin = %self.entry.name, "data plugin configuration unchanged");
            return Ok(());
        }
        tracing::info!(plugin = %self.entry.name, "data plugin configuration changed; restarting");
        let was_running = self.running.is_some();
        self.stop(timeout).await;
        self.entry = next;
        if was_running {
            self.start().await?;
        }
        Ok(())
    }

    /// Called from the store trigger after every commit.
    pub fn on_commit(&self, event: &TriggerEvent) {
        self.hook.on_commit(event);
    }
}

/// The state moved into the loop task.
struct Worker {
    name: String,
    path: Path,
    interval: Duration,
    store: Arc<Store>,
    transform: Option<Arc<TransformSlot>>,
    source: Box<dyn Source>,
    state: Arc<watch::Sender<PluginState>>,
}

impl Worker {
    async fn run(mut self, mut exit_rx: oneshot::Receiver<()>, done_tx: oneshot::Sender<()>) {
        loop {
            if let Err(e) = self.tick().await {
                tracing::error!(plugin = %self.name, error = %e, "data plugin tick failed");
            }
            self.set_state(PluginState::Polling);
            tokio::select! {
                _ = &mut exit_rx => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        self.set_state(PluginState::Draining);
        tracing::debug!(plugin = %self.name, "data plugin loop exiting");
        self.set_state(PluginState::Stopped);
        let _ = done_tx.send(());
    }

    fn set_state(&self, state: PluginState) {
        self.state.send_replace(state);
    }

    async fn tick(&mut self) -> Result<(), DataError> {
        self.set_state(PluginState::Fetching);
        let Some(batch) = self.source.fetch().await? else {
            tracing::debug!(plugin = %self.name, "no new data");
            return Ok(());
        };

        let value = match &self.transform {
            Some(slot) => {
                self.set_state(PluginState::Transforming);
                let previous = match self.store.read_one(&self.path).await {
                    Ok(value) => value,
                    Err(e) if e.is_not_found() => Value::Null,
                    Err(e) => return Err(e.into()),
                };
                let input = json!({ "incoming": batch, "previous": previous });
                slot.current()?.eval(&input)?
            }
            None => batch,
        };

        self.set_state(PluginState::Ingesting);
        ingest(&self.store, &self.path, value).await?;
        tracing::debug!(plugin = %self.name, path = %self.path, "data ingested");
        Ok(())
    }
}

/// Make sure `path` exists. Data left there by an earlier run is kept as is,
/// whatever its type; otherwise an empty Object is created.
async fn prepare_path(store: &Store, txn: &mut Transaction, path: &Path) -> Result<(), StoreError> {
    match store.read(txn, path).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => store.make_dir(txn, path).await,
        Err(e) => Err(e),
    }
}

/// Replace the value at `path` in one write transaction, creating missing
/// ancestors first. Ownership is not checked: the caller owns `path`.
async fn ingest(store: &Store, path: &Path, value: Value) -> Result<(), DataError> {
    let mut txn = store.new_transaction(TransactionParams::write()).await;
    let written = match path.parent() {
        Some(parent) => store.make_dir(&mut txn, &parent).await,
        None => Ok(()),
    };
    let written = match written {
        Ok(()) => store.write_unchecked(&mut txn, PatchOp::Add, path, value).await,
        Err(e) => Err(e),
    };
    match written {
        Ok(()) => Ok(store.commit(txn).await?),
        Err(e) => {
            store.abort(txn);
            Err(e.into())
        }
    }
}
