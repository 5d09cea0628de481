// bundle.rs — A loaded bundle and its on-disk layout.
//
// Directory layout:
//
//   <dir>/.manifest              JSON manifest (optional)
//   <dir>/data.json              data placed at the tree root
//   <dir>/acme/users/data.yaml   data placed at /acme/users
//   <dir>/authz/main.rego        policy text, id "authz/main.rego"
//
// Other files are ignored. Data files found in the same directory are merged.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path as FsPath;

use serde_json::{Map, Value};

use tessera_store::tree::merge_insert;
use tessera_store::{Path, Update};

use crate::error::BundleError;
use crate::manifest::Manifest;

const MANIFEST_FILE: &str = ".manifest";
const POLICY_EXT: &str = "rego";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bundle {
    pub name: String,
    pub manifest: Manifest,
    pub data: Map<String, Value>,
    /// Relative file path (slash separated) → policy text.
    pub policies: BTreeMap<String, String>,
}

impl Bundle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Load a bundle from a directory on disk.
    pub fn load_dir(name: impl Into<String>, dir: &FsPath) -> Result<Self, BundleError> {
        let mut bundle = Bundle::new(name);

        let manifest_path = dir.join(MANIFEST_FILE);
        if manifest_path.is_file() {
            let text = read_file(&manifest_path)?;
            bundle.manifest = serde_json::from_str(&text).map_err(|e| BundleError::Parse {
                path: manifest_path.clone(),
                reason: e.to_string(),
            })?;
        }

        let mut data = Value::Object(Map::new());
        load_tree(dir, &mut Vec::new(), &mut data, &mut bundle.policies)?;
        if let Value::Object(map) = data {
            bundle.data = map;
        }

        tracing::debug!(
            bundle = %bundle.name,
            dir = %dir.display(),
            policies = bundle.policies.len(),
            "bundle loaded"
        );
        Ok(bundle)
    }

    /// Check the manifest roots and that all data falls under them.
    pub fn validate(&self) -> Result<(), BundleError> {
        self.manifest.validate(&self.name)?;
        let roots = self.manifest.root_paths(&self.name)?;
        check_under_roots(&self.name, &Path::root(), &Value::Object(self.data.clone()), &roots)
    }

    /// Id under which a policy file of this bundle is stored.
    pub fn policy_id(&self, file: &str) -> String {
        format!("{}/{}", self.name, file)
    }

    /// The bundle's data and policies as a truncate update stream.
    pub fn updates(&self) -> Vec<Update> {
        let mut updates = vec![Update::data(Path::root(), Value::Object(self.data.clone()))];
        updates.extend(
            self.policies
                .iter()
                .map(|(file, text)| Update::policy(self.policy_id(file), text.clone())),
        );
        updates
    }
}

fn read_file(path: &FsPath) -> Result<String, BundleError> {
    fs::read_to_string(path).map_err(|source| BundleError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn load_tree(
    dir: &FsPath,
    prefix: &mut Vec<String>,
    data: &mut Value,
    policies: &mut BTreeMap<String, String>,
) -> Result<(), BundleError> {
    let entries = fs::read_dir(dir).map_err(|source| BundleError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut entries = entries
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| BundleError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name.starts_with('.') {
            continue;
        }

        if path.is_dir() {
            prefix.push(file_name);
            load_tree(&path, prefix, data, policies)?;
            prefix.pop();
            continue;
        }

        match file_name.as_str() {
            "data.json" => {
                let value = serde_json::from_str(&read_file(&path)?).map_err(|e| {
                    BundleError::Parse {
                        path: path.clone(),
                        reason: e.to_string(),
                    }
                })?;
                insert_data(prefix, value, &path, data)?;
            }
            "data.yaml" | "data.yml" => {
                let value = serde_yaml::from_str(&read_file(&path)?).map_err(|e| {
                    BundleError::Parse {
                        path: path.clone(),
                        reason: e.to_string(),
                    }
                })?;
                insert_data(prefix, value, &path, data)?;
            }
            _ if path.extension().is_some_and(|ext| ext == POLICY_EXT) => {
                let mut id = prefix.join("/");
                if !id.is_empty() {
                    id.push('/');
                }
                id.push_str(&file_name);
                policies.insert(id, read_file(&path)?);
            }
            _ => {}
        }
    }
    Ok(())
}

fn insert_data(
    prefix: &[String],
    value: Value,
    file: &FsPath,
    data: &mut Value,
) -> Result<(), BundleError> {
    let at = Path::new(prefix.iter().cloned()).map_err(|e| BundleError::Parse {
        path: file.to_path_buf(),
        reason: e.to_string(),
    })?;
    if at.is_root() && !value.is_object() {
        return Err(BundleError::Parse {
            path: file.to_path_buf(),
            reason: "top-level data must be an object".to_string(),
        });
    }
    merge_insert(data, &at, value);
    Ok(())
}

/// Walk `value` (found at `at`) and fail on the first location that is not
/// covered by any root. Descends only while some root lies deeper.
fn check_under_roots(
    bundle: &str,
    at: &Path,
    value: &Value,
    roots: &[Path],
) -> Result<(), BundleError> {
    if roots.iter().any(|root| at.has_prefix(root)) {
        return Ok(());
    }
    let outside = || BundleError::OutsideRoots {
        bundle: bundle.to_string(),
        path: at.to_string(),
    };
    if !roots.iter().any(|root| root.has_prefix(at)) {
        return Err(outside());
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = at.child(key.clone())?;
                check_under_roots(bundle, &child_path, child, roots)?;
            }
            Ok(())
        }
        // A leaf above every root would place data outside them.
        _ => Err(outside()),
    }
}
