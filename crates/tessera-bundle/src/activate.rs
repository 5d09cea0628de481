// activate.rs — Installing bundles into the store and reading them back.
//
// Activation is one write transaction:
//   1. drop policies left over from a previous revision of each bundle
//   2. truncate the bundles' roots with their data and policies
//   3. record each manifest at /system/bundles/<name>/manifest
//
// The recorded manifests are how other components discover which parts of
// the tree belong to bundles (see `roots_in_view`).

use std::collections::BTreeMap;

use serde_json::Value;

use tessera_store::{
    CommitView, PatchOp, Path, Store, Transaction, TransactionParams, TruncateParams, Update,
};

use crate::bundle::Bundle;
use crate::error::BundleError;
use crate::manifest::Manifest;

/// Where bundle manifests are recorded.
pub fn bundles_path() -> Result<Path, BundleError> {
    Ok(Path::new(["system", "bundles"])?)
}

pub fn manifest_path(name: &str) -> Result<Path, BundleError> {
    Ok(Path::new(["system", "bundles", name, "manifest"])?)
}

/// Validate each bundle and check that no two bundles share a root.
pub fn validate_set(bundles: &[Bundle]) -> Result<(), BundleError> {
    let mut seen: Vec<(&str, Path)> = Vec::new();
    for bundle in bundles {
        bundle.validate()?;
        for root in bundle.manifest.root_paths(&bundle.name)? {
            if let Some((other, other_root)) = seen.iter().find(|(_, r)| r.overlaps(&root)) {
                return Err(BundleError::RootOverlap {
                    first: other.to_string(),
                    first_root: other_root.to_string(),
                    second: bundle.name.clone(),
                    second_root: root.to_string(),
                });
            }
            seen.push((bundle.name.as_str(), root));
        }
    }
    Ok(())
}

/// Install `bundles` in a single write transaction. Nothing is changed when
/// any step fails.
pub async fn activate(store: &Store, bundles: &[Bundle]) -> Result<(), BundleError> {
    validate_set(bundles)?;
    let mut txn = store.new_transaction(TransactionParams::write()).await;
    if let Err(e) = activate_in(store, &mut txn, bundles).await {
        store.abort(txn);
        tracing::error!(error = %e, "bundle activation failed");
        return Err(e);
    }
    store.commit(txn).await?;
    for bundle in bundles {
        tracing::info!(
            bundle = %bundle.name,
            revision = %bundle.manifest.revision,
            roots = ?bundle.manifest.effective_roots(),
            "bundle activated"
        );
    }
    Ok(())
}

async fn activate_in(
    store: &Store,
    txn: &mut Transaction,
    bundles: &[Bundle],
) -> Result<(), BundleError> {
    let mut base_paths = Vec::new();
    let mut updates: Vec<Update> = Vec::new();
    for bundle in bundles {
        drop_policies(store, txn, &bundle.name).await?;
        base_paths.extend(bundle.manifest.root_paths(&bundle.name)?);
        updates.extend(bundle.updates());
    }

    store
        .truncate(txn, TruncateParams::new(base_paths), updates)
        .await?;

    for bundle in bundles {
        let path = manifest_path(&bundle.name)?;
        if let Some(parent) = path.parent() {
            store.make_dir(txn, &parent).await?;
        }
        let manifest = serde_json::to_value(&bundle.manifest).map_err(|e| BundleError::Parse {
            path: ".manifest".into(),
            reason: e.to_string(),
        })?;
        store.write(txn, PatchOp::Add, &path, manifest).await?;
    }
    Ok(())
}

/// Remove the named bundles' data, policies and manifests in one write
/// transaction.
pub async fn deactivate(store: &Store, names: &[String]) -> Result<(), BundleError> {
    let mut txn = store.new_transaction(TransactionParams::write()).await;
    if let Err(e) = deactivate_in(store, &mut txn, names).await {
        store.abort(txn);
        return Err(e);
    }
    store.commit(txn).await?;
    for name in names {
        tracing::info!(bundle = %name, "bundle deactivated");
    }
    Ok(())
}

async fn deactivate_in(
    store: &Store,
    txn: &mut Transaction,
    names: &[String],
) -> Result<(), BundleError> {
    let mut base_paths = Vec::new();
    for name in names {
        let path = manifest_path(name)?;
        let raw = match store.read(txn, &path).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => return Err(BundleError::NotActive { name: name.clone() }),
            Err(e) => return Err(e.into()),
        };
        let manifest: Manifest = serde_json::from_value(raw).map_err(|e| BundleError::Parse {
            path: path.to_string().into(),
            reason: e.to_string(),
        })?;
        base_paths.extend(manifest.root_paths(name)?);
        drop_policies(store, txn, name).await?;
    }

    // With no updates, truncate removes whatever is at each root.
    store
        .truncate(txn, TruncateParams::new(base_paths), Vec::new())
        .await?;

    for name in names {
        let entry = bundles_path()?.child(name.as_str())?;
        match store.write(txn, PatchOp::Remove, &entry, Value::Null).await {
            Ok(()) => {}
            // A whole-tree root already took the manifest with it.
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

async fn drop_policies(store: &Store, txn: &mut Transaction, bundle: &str) -> Result<(), BundleError> {
    let prefix = format!("{}/", bundle);
    let stale: Vec<String> = store
        .list_policies(txn)
        .await?
        .into_iter()
        .filter(|id| id.starts_with(&prefix))
        .collect();
    for id in stale {
        store.delete_policy(txn, &id).await?;
    }
    Ok(())
}

/// Bundle name → roots, read from the value stored at `/system/bundles`.
/// Entries whose manifest does not parse are skipped.
pub fn bundle_roots(bundles: &Value) -> BTreeMap<String, Vec<Path>> {
    let mut out = BTreeMap::new();
    let Value::Object(entries) = bundles else {
        return out;
    };
    for (name, entry) in entries {
        let Some(raw) = entry.get("manifest") else {
            continue;
        };
        let manifest: Manifest = match serde_json::from_value(raw.clone()) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(bundle = %name, error = %e, "skipping unreadable bundle manifest");
                continue;
            }
        };
        match manifest.root_paths(name) {
            Ok(roots) => {
                out.insert(name.clone(), roots);
            }
            Err(e) => tracing::warn!(bundle = %name, error = %e, "skipping bundle with invalid roots"),
        }
    }
    out
}

/// Bundle roots as of the commit a trigger is observing.
pub fn roots_in_view(view: &CommitView<'_>) -> BTreeMap<String, Vec<Path>> {
    bundles_path()
        .ok()
        .and_then(|path| view.read(&path).ok())
        .map(bundle_roots)
        .unwrap_or_default()
}
