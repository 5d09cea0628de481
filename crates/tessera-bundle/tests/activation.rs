// activation.rs — Bundle activation against a live store.
//
// Covers the full cycle:
//
//   1. Load a bundle from disk and activate it
//   2. Re-activate a newer revision: stale data and policies disappear
//   3. Deactivate: roots, policies and manifest are removed
//   4. Activation under a claimed path fails and changes nothing

use std::fs;
use std::sync::Arc;

use serde_json::json;

use tessera_bundle::{activate, deactivate, manifest_path, Bundle, BundleError};
use tessera_store::{path, Path, Store, StoreError, TransactionParams};

fn write_bundle(dir: &std::path::Path, revision: &str, users: &str, policy: Option<&str>) {
    fs::write(
        dir.join(".manifest"),
        format!(r#"{{"revision": "{revision}", "roots": ["acme"]}}"#),
    )
    .unwrap();
    fs::create_dir_all(dir.join("acme")).unwrap();
    fs::write(dir.join("acme/data.json"), users).unwrap();
    let rego = dir.join("acme/authz.rego");
    match policy {
        Some(text) => fs::write(&rego, text).unwrap(),
        None => {
            let _ = fs::remove_file(&rego);
        }
    }
}

async fn policies(store: &Store) -> Vec<String> {
    let txn = store.new_transaction(TransactionParams::read()).await;
    let ids = store.list_policies(&txn).await.unwrap();
    store.commit(txn).await.unwrap();
    ids
}

#[tokio::test]
async fn activate_reactivate_and_deactivate() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::new());

    // Data outside the bundle's roots must survive every step.
    store
        .write_one(tessera_store::PatchOp::Add, &path!["other"], json!(42))
        .await
        .unwrap();

    write_bundle(
        dir.path(),
        "1",
        r#"{"users": {"alice": {}}, "legacy": true}"#,
        Some("package acme"),
    );
    let bundle = Bundle::load_dir("acme", dir.path()).unwrap();
    activate(&store, &[bundle]).await.unwrap();

    assert_eq!(
        store.read_one(&path!["acme"]).await.unwrap(),
        json!({"users": {"alice": {}}, "legacy": true})
    );
    assert_eq!(
        store
            .read_one(&manifest_path("acme").unwrap())
            .await
            .unwrap()["revision"],
        json!("1")
    );
    assert_eq!(policies(&store).await, vec!["acme/acme/authz.rego"]);

    // Revision 2 drops the `legacy` key and the policy.
    write_bundle(dir.path(), "2", r#"{"users": {"bob": {}}}"#, None);
    let bundle = Bundle::load_dir("acme", dir.path()).unwrap();
    activate(&store, &[bundle]).await.unwrap();
    assert_eq!(
        store.read_one(&path!["acme"]).await.unwrap(),
        json!({"users": {"bob": {}}})
    );
    assert!(policies(&store).await.is_empty());

    deactivate(&store, &["acme".to_string()]).await.unwrap();
    assert!(store.read_one(&path!["acme"]).await.unwrap_err().is_not_found());
    assert!(store
        .read_one(&manifest_path("acme").unwrap())
        .await
        .unwrap_err()
        .is_not_found());
    assert_eq!(store.read_one(&path!["other"]).await.unwrap(), json!(42));

    assert!(matches!(
        deactivate(&store, &["acme".to_string()]).await,
        Err(BundleError::NotActive { .. })
    ));
}

#[tokio::test]
async fn activation_under_a_claim_changes_nothing() {
    let store = Store::new();
    store.claim_path("kafka.updates", path!["kafka", "updates"]);

    let mut bundle = Bundle::new("feeds");
    bundle.manifest.roots = Some(vec!["kafka/updates/static".to_string()]);
    bundle.data = serde_json::from_value(json!({"kafka": {"updates": {"static": [1]}}})).unwrap();

    let err = activate(&store, &[bundle]).await.unwrap_err();
    assert!(matches!(
        err,
        BundleError::Store(StoreError::PathOwned { ref plugin, .. }) if plugin == "kafka.updates"
    ));
    assert_eq!(store.read_one(&Path::root()).await.unwrap(), json!({}));
}

#[tokio::test]
async fn whole_tree_bundle_refused_while_plugins_hold_claims() {
    let store = Store::new();
    store.claim_path("git", path!["git"]);
    let bundle = Bundle::new("everything");
    assert!(matches!(
        activate(&store, &[bundle]).await,
        Err(BundleError::Store(StoreError::PathOwned { .. }))
    ));
}
