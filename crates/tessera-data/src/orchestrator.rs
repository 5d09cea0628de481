// orchestrator.rs — DataPlugins: owns every configured plugin instance and
// keeps the set in line with the configuration.
//
// The orchestrator registers one store trigger. On every commit it runs each
// active plugin's post-commit hook, then looks for bundle roots that overlap
// a plugin's path. The trigger only reads a snapshot of the active set kept
// behind a short-lived lock; it never waits on the orchestrator itself,
// because a commit can happen while the orchestrator is in the middle of a
// lifecycle operation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use tessera_bundle::{bundle_roots, bundles_path, roots_in_view};
use tessera_store::{
    CommitView, PatchOp, Path, Store, StoreError, Transaction, TransactionParams, TriggerEvent,
    TriggerHandle,
};

use crate::config::Config;
use crate::error::DataError;
use crate::plugin::{DataPlugin, PluginContext, PluginState, PostCommitHook};
use crate::status::{ComponentStatus, Status};

/// Name under which the orchestrator reports its status.
pub const COMPONENT: &str = "data";

/// Default bound on how long a single plugin may take to stop.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct ActivePlugin {
    path: Path,
    hook: PostCommitHook,
}

/// State shared with the store trigger.
struct Watcher {
    active: RwLock<BTreeMap<String, ActivePlugin>>,
    /// Message of the overlap currently reported, if any.
    overlap: Mutex<Option<String>>,
    status: Arc<crate::status::StatusRegistry>,
}

impl Watcher {
    fn on_commit(&self, view: &CommitView<'_>, event: &TriggerEvent) {
        let active = self.active.read().clone();
        for plugin in active.values() {
            plugin.hook.on_commit(event);
        }
        self.check(&active, &roots_in_view(view));
    }

    /// Compare active plugin paths against bundle roots and move the status
    /// into or out of the overlap error.
    fn check(&self, active: &BTreeMap<String, ActivePlugin>, bundles: &BTreeMap<String, Vec<Path>>) {
        let mut conflicts = Vec::new();
        for (name, plugin) in active {
            for (bundle, roots) in bundles {
                for root in roots.iter().filter(|root| root.overlaps(&plugin.path)) {
                    conflicts.push(format!(
                        "data plugin \"{}\" path {} overlaps bundle \"{}\" root {}",
                        name, plugin.path, bundle, root
                    ));
                }
            }
        }

        let mut overlap = self.overlap.lock();
        if conflicts.is_empty() {
            if overlap.take().is_some() {
                tracing::info!("data plugin paths no longer overlap bundle roots");
                self.status.set(COMPONENT, Status::Ok, None);
            }
            return;
        }
        let message = conflicts.join("; ");
        if overlap.as_deref() != Some(message.as_str()) {
            tracing::error!(conflicts = %message, "data plugin path overlaps bundle root");
            self.status.set(COMPONENT, Status::Error, Some(message.clone()));
            *overlap = Some(message);
        }
    }

    fn in_overlap(&self) -> bool {
        self.overlap.lock().is_some()
    }
}

/// The data source orchestrator.
pub struct DataPlugins {
    ctx: PluginContext,
    config: Config,
    plugins: BTreeMap<String, DataPlugin>,
    watcher: Arc<Watcher>,
    trigger: Option<TriggerHandle>,
    stop_timeout: Duration,
}

impl DataPlugins {
    /// Build one instance per entry. Nothing is started.
    pub fn new(ctx: PluginContext, config: Config) -> Self {
        let plugins = config
            .entries
            .iter()
            .map(|(name, entry)| (name.clone(), DataPlugin::new(entry.clone(), ctx.clone())))
            .collect();
        let watcher = Arc::new(Watcher {
            active: RwLock::new(BTreeMap::new()),
            overlap: Mutex::new(None),
            status: Arc::clone(&ctx.status),
        });
        ctx.status.set(COMPONENT, Status::NotReady, None);
        Self {
            ctx,
            config,
            plugins,
            watcher,
            trigger: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Bound used for each plugin when stopping during a reconfiguration.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Start every plugin, claim their paths and register the commit trigger.
    pub async fn start(&mut self) -> Result<(), DataError> {
        let store = Arc::clone(&self.ctx.store);
        for (name, plugin) in self.plugins.iter_mut() {
            if let Err(e) = plugin.start().await {
                self.ctx.status.set(
                    COMPONENT,
                    Status::Error,
                    Some(format!("data plugin \"{}\" failed to start: {}", name, e)),
                );
                return Err(e);
            }
            store.claim_path(name.clone(), plugin.path().clone());
        }
        self.publish_active();

        if self.trigger.is_none() {
            let txn = store.new_transaction(TransactionParams::write()).await;
            let watcher = Arc::clone(&self.watcher);
            let registered = store.register(&txn, move |view: &CommitView<'_>, event: &TriggerEvent| {
                watcher.on_commit(view, event)
            });
            match registered {
                Ok(handle) => {
                    store.commit(txn).await?;
                    self.trigger = Some(handle);
                }
                Err(e) => {
                    store.abort(txn);
                    return Err(e.into());
                }
            }
        }

        // The registering commit already ran the overlap check.
        if !self.watcher.in_overlap() {
            self.ctx.status.set(COMPONENT, Status::Ok, None);
        }
        tracing::info!(plugins = self.plugins.len(), "data plugins started");
        self.check_overlaps().await;
        Ok(())
    }

    /// Stop every plugin, release all claims and unregister the trigger.
    pub async fn stop(&mut self, timeout: Duration) {
        for plugin in self.plugins.values_mut() {
            plugin.stop(timeout).await;
        }
        let store = &self.ctx.store;
        store.release_all();
        self.watcher.active.write().clear();
        *self.watcher.overlap.lock() = None;

        if let Some(handle) = self.trigger.take() {
            let txn = store.new_transaction(TransactionParams::write()).await;
            if let Err(e) = store.unregister(&txn, handle) {
                tracing::warn!(error = %e, "failed to unregister data plugin trigger");
            }
            if let Err(e) = store.commit(txn).await {
                tracing::warn!(error = %e, "failed to commit trigger removal");
            }
        }
        self.ctx.status.set(COMPONENT, Status::NotReady, None);
        tracing::info!("data plugins stopped");
    }

    /// Move from the current configuration to `next`.
    pub async fn reconfigure(&mut self, next: Config) -> Result<(), DataError> {
        match self.apply(next).await {
            Ok(()) => {
                if self.trigger.is_some() && !self.watcher.in_overlap() {
                    self.ctx.status.set(COMPONENT, Status::Ok, None);
                }
                self.check_overlaps().await;
                Ok(())
            }
            Err(e) => {
                self.ctx.status.set(
                    COMPONENT,
                    Status::Error,
                    Some(format!("reconfiguration failed: {}", e)),
                );
                Err(e)
            }
        }
    }

    async fn apply(&mut self, next: Config) -> Result<(), DataError> {
        let store = Arc::clone(&self.ctx.store);
        let timeout = self.stop_timeout;

        // Stop removed plugins first: their loops may be waiting to commit,
        // and they could not while we hold the writer lock below.
        let removed: Vec<String> = self
            .plugins
            .keys()
            .filter(|name| !next.entries.contains_key(*name))
            .cloned()
            .collect();
        let mut removed_paths = Vec::new();
        for name in &removed {
            if let Some(mut plugin) = self.plugins.remove(name) {
                plugin.stop(timeout).await;
                removed_paths.push(plugin.path().clone());
            }
        }
        self.publish_active();

        if !removed_paths.is_empty() {
            remove_subtrees(&store, &removed_paths).await?;
        }
        for name in &removed {
            store.release_path(name);
            tracing::info!(plugin = %name, "data plugin removed");
        }

        for (name, entry) in &next.entries {
            match self.plugins.get_mut(name) {
                Some(plugin) => plugin.reconfigure(entry.clone(), timeout).await?,
                None => {
                    let mut plugin = DataPlugin::new(entry.clone(), self.ctx.clone());
                    plugin.start().await?;
                    store.claim_path(name.clone(), plugin.path().clone());
                    self.plugins.insert(name.clone(), plugin);
                    tracing::info!(plugin = %name, "data plugin added");
                }
            }
        }

        self.config = next;
        self.publish_active();
        Ok(())
    }

    /// Latest status of the orchestrator.
    pub fn status(&self) -> Option<ComponentStatus> {
        self.ctx.status.get(COMPONENT)
    }

    /// Plugin name → owned path, for running plugins.
    pub fn active_paths(&self) -> BTreeMap<String, Path> {
        self.watcher
            .active
            .read()
            .iter()
            .map(|(name, plugin)| (name.clone(), plugin.path.clone()))
            .collect()
    }

    pub fn plugin_state(&self, name: &str) -> Option<PluginState> {
        self.plugins.get(name).map(DataPlugin::state)
    }

    pub fn plugin(&self, name: &str) -> Option<&DataPlugin> {
        self.plugins.get(name)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Refresh the snapshot the trigger reads.
    fn publish_active(&self) {
        let active = self
            .plugins
            .iter()
            .filter(|(_, plugin)| plugin.is_running())
            .map(|(name, plugin)| {
                (
                    name.clone(),
                    ActivePlugin {
                        path: plugin.path().clone(),
                        hook: plugin.hook(),
                    },
                )
            })
            .collect();
        *self.watcher.active.write() = active;
    }

    /// Run the overlap check against the current tree, outside of any commit.
    async fn check_overlaps(&self) {
        let bundles = match bundles_path() {
            Ok(path) => match self.ctx.store.read_one(&path).await {
                Ok(value) => bundle_roots(&value),
                Err(_) => BTreeMap::new(),
            },
            Err(_) => BTreeMap::new(),
        };
        let active = self.watcher.active.read().clone();
        self.watcher.check(&active, &bundles);
    }
}

/// Remove each path in one write transaction, then prune ancestors left as
/// empty Objects (stopping at the root or the first non-empty ancestor).
async fn remove_subtrees(store: &Store, paths: &[Path]) -> Result<(), DataError> {
    let mut txn = store.new_transaction(TransactionParams::write()).await;
    for path in paths {
        let result = remove_and_prune(store, &mut txn, path).await;
        if let Err(e) = result {
            store.abort(txn);
            return Err(e.into());
        }
    }
    store.commit(txn).await?;
    Ok(())
}

async fn remove_and_prune(
    store: &Store,
    txn: &mut Transaction,
    path: &Path,
) -> Result<(), StoreError> {
    match store
        .write_unchecked(txn, PatchOp::Remove, path, Value::Null)
        .await
    {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    let mut current = path.parent();
    while let Some(ancestor) = current {
        if ancestor.is_root() {
            break;
        }
        match store.read(txn, &ancestor).await {
            Ok(Value::Object(map)) if map.is_empty() => {
                store
                    .write_unchecked(txn, PatchOp::Remove, &ancestor, Value::Null)
                    .await?;
            }
            _ => break,
        }
        current = ancestor.parent();
    }
    Ok(())
}
