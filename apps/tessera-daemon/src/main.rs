//! # tessera-daemon
//!
//! Runs the Tessera data plane: activates the configured bundles, starts the
//! data plugins, and keeps them in line with the config file until shutdown.
//!
//! ## Usage
//!
//! ```text
//! tessera --config tessera.yaml
//! RUST_LOG=tessera_store=debug tessera --config tessera.yaml --no-watch
//! ```
//!
//! Editing the config file while the daemon runs reconfigures the data
//! plugins in place. An invalid edit is logged and the running set is kept.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use tessera_bundle::{activate, Bundle};
use tessera_data::{validate, DataPlugins, NoTransformEngine, PluginContext, Registry, StatusRegistry};
use tessera_store::Store;

use config::DaemonConfig;

/// Tessera data plane daemon.
#[derive(Parser)]
#[command(name = "tessera", version, about = "Tessera data plane daemon")]
struct Cli {
    /// Config file (YAML, JSON or TOML).
    #[arg(long, default_value = "tessera.yaml")]
    config: PathBuf,

    /// Don't reload the config file when it changes.
    #[arg(long)]
    no_watch: bool,
}

/// Quiet period after a file event before the config is re-read; editors
/// often write a file in several steps.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tessera_data=info".parse()?)
                .add_directive("tessera_bundle=info".parse()?)
                .add_directive("tessera_daemon=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .canonicalize()
        .with_context(|| format!("config file {}", cli.config.display()))?;
    let config = DaemonConfig::load(&config_path)?;
    tracing::info!("Starting Tessera data plane");
    tracing::info!("Config: {}", config_path.display());

    let store = Arc::new(Store::new());
    let registry = Registry::with_builtin();

    let bundles = config
        .bundles
        .iter()
        .map(|source| {
            Bundle::load_dir(source.name.clone(), &source.path)
                .with_context(|| format!("loading bundle \"{}\"", source.name))
        })
        .collect::<Result<Vec<_>>>()?;
    if !bundles.is_empty() {
        activate(&store, &bundles)
            .await
            .context("activating bundles")?;
    }

    let plugin_config = validate(&registry, &config.plugins.data).context("data plugin configuration")?;
    let ctx = PluginContext {
        store: Arc::clone(&store),
        engine: Arc::new(NoTransformEngine),
        status: Arc::new(StatusRegistry::new()),
    };
    let mut plugins =
        DataPlugins::new(ctx, plugin_config).with_stop_timeout(config.shutdown_timeout()?);
    plugins.start().await.context("starting data plugins")?;
    tracing::info!(plugins = plugins.config().len(), "data plane ready");

    let (reload_tx, mut reload_rx) = mpsc::unbounded_channel::<()>();
    // Dropping the watcher stops it, so it lives as long as main.
    let _watcher = if cli.no_watch {
        None
    } else {
        Some(watch_config(&config_path, reload_tx)?)
    };

    let mut shutdown_timeout = config.shutdown_timeout()?;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::error!("failed to listen for shutdown signal: {}", e);
                }
                break;
            }
            Some(()) = reload_rx.recv() => {
                tokio::time::sleep(RELOAD_DEBOUNCE).await;
                while reload_rx.try_recv().is_ok() {}
                if let Some(timeout) = reload(&config_path, &registry, &mut plugins).await {
                    shutdown_timeout = timeout;
                }
            }
        }
    }

    tracing::info!("Shutting down");
    plugins.stop(shutdown_timeout).await;
    Ok(())
}

/// Re-read the config file and reconfigure the data plugins. Returns the new
/// shutdown timeout when the file was applied.
async fn reload(path: &Path, registry: &Registry, plugins: &mut DataPlugins) -> Option<Duration> {
    let config = match DaemonConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("config reload failed, keeping running plugins: {:#}", e);
            return None;
        }
    };
    let next = match validate(registry, &config.plugins.data) {
        Ok(next) => next,
        Err(e) => {
            tracing::error!("invalid data plugin configuration, keeping running plugins: {}", e);
            return None;
        }
    };
    if let Err(e) = plugins.reconfigure(next).await {
        tracing::error!("data plugin reconfiguration failed: {}", e);
        return None;
    }
    tracing::info!(plugins = plugins.config().len(), "configuration reloaded");
    config.shutdown_timeout().ok()
}

/// Watch the config file's directory and signal on events touching the file.
/// Editors usually replace the file rather than write it in place, so the
/// file itself cannot be watched.
fn watch_config(path: &Path, tx: mpsc::UnboundedSender<()>) -> Result<notify::RecommendedWatcher> {
    let file_name = path.file_name().map(|n| n.to_os_string());
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        match event {
            Ok(event) => {
                let touched = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if touched && (event.kind.is_modify() || event.kind.is_create()) {
                    let _ = tx.send(());
                }
            }
            Err(e) => tracing::warn!("config watcher error: {}", e),
        }
    })
    .context("creating config watcher")?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("watching {}", dir.display()))?;
    tracing::info!("Watching {} for changes", path.display());
    Ok(watcher)
}
