//! Daemon configuration file.
//!
//! ```yaml
//! plugins:
//!   data:
//!     kafka.updates:
//!       type: http
//!       url: https://feeds.internal/updates.json
//!       polling_interval: 30s
//! bundles:
//!   - name: authz
//!     path: ./bundles/authz
//! shutdown_timeout: 10s
//! ```
//!
//! The format is picked by extension: `.yaml`/`.yml`, `.json`, or `.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tessera_data::parse_duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Bundles activated at startup, in order.
    #[serde(default)]
    pub bundles: Vec<BundleSource>,

    /// Upper bound on how long each plugin may take to stop.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Raw data plugin configuration, validated by `tessera_data::validate`.
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleSource {
    pub name: String,
    /// Bundle directory. Relative paths resolve against the config file.
    pub path: PathBuf,
}

fn default_shutdown_timeout() -> String {
    "10s".to_string()
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let mut config: DaemonConfig = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .with_context(|| format!("parsing YAML config {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("parsing JSON config {}", path.display()))?,
            "toml" => toml::from_str(&content)
                .with_context(|| format!("parsing TOML config {}", path.display()))?,
            other => bail!(
                "unsupported config extension {:?} for {} (expected yaml, yml, json or toml)",
                other,
                path.display()
            ),
        };

        if let Some(base) = path.parent() {
            for bundle in &mut config.bundles {
                if bundle.path.is_relative() {
                    bundle.path = base.join(&bundle.path);
                }
            }
        }
        // Fail early on a bad timeout rather than at shutdown.
        config.shutdown_timeout()?;
        Ok(config)
    }

    pub fn shutdown_timeout(&self) -> Result<Duration> {
        parse_duration(&self.shutdown_timeout)
            .map_err(|e| anyhow::anyhow!("shutdown_timeout: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loads_yaml_and_resolves_bundle_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tessera.yaml");
        std::fs::write(
            &file,
            "plugins:\n  data:\n    git.placeholder:\n      type: file\n      path: /tmp/git.json\n\
             bundles:\n  - name: authz\n    path: bundles/authz\n",
        )
        .unwrap();

        let config = DaemonConfig::load(&file).unwrap();
        assert_eq!(
            config.plugins.data,
            json!({"git.placeholder": {"type": "file", "path": "/tmp/git.json"}})
        );
        assert_eq!(config.bundles[0].path, dir.path().join("bundles/authz"));
        assert_eq!(config.shutdown_timeout().unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn loads_toml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let toml_file = dir.path().join("tessera.toml");
        std::fs::write(
            &toml_file,
            "shutdown_timeout = \"2s\"\n[plugins.data.\"kafka.updates\"]\ntype = \"http\"\nurl = \"http://x\"\n",
        )
        .unwrap();
        let config = DaemonConfig::load(&toml_file).unwrap();
        assert_eq!(config.shutdown_timeout().unwrap(), Duration::from_secs(2));
        assert_eq!(config.plugins.data["kafka.updates"]["type"], json!("http"));

        let json_file = dir.path().join("tessera.json");
        std::fs::write(&json_file, r#"{"plugins": {}}"#).unwrap();
        let config = DaemonConfig::load(&json_file).unwrap();
        assert!(config.plugins.data.is_null());
        assert!(config.bundles.is_empty());
    }

    #[test]
    fn rejects_unknown_extension_and_bad_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let ini = dir.path().join("tessera.ini");
        std::fs::write(&ini, "").unwrap();
        assert!(DaemonConfig::load(&ini).is_err());

        let yaml = dir.path().join("tessera.yaml");
        std::fs::write(&yaml, "shutdown_timeout: whenever\n").unwrap();
        assert!(DaemonConfig::load(&yaml).is_err());
    }
}
