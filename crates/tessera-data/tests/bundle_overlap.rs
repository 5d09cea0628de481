// bundle_overlap.rs — Plugins and bundles sharing one tree.
//
//   1. A bundle whose root falls under a plugin's path flips the status to
//      Error on the activating commit; both data sets stay readable
//   2. Deactivating the bundle brings the status back to Ok
//   3. An overlap that already exists at start is reported immediately
//   4. Bundle data under a claimed path is refused outright

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use tessera_bundle::{activate, deactivate, Bundle, BundleError, Manifest};
use tessera_data::{validate, DataPlugins, Status};
use tessera_store::{path, Store, StoreError};

use common::{context, registry, wait_for_value, Feeds};

const STOP: Duration = Duration::from_secs(5);

fn bundle(name: &str, roots: &[&str], data: Value) -> Bundle {
    let Value::Object(data) = data else {
        panic!("bundle data must be an object");
    };
    Bundle {
        manifest: Manifest {
            revision: "r1".to_string(),
            roots: Some(roots.iter().map(|r| r.to_string()).collect()),
            metadata: Map::new(),
        },
        data,
        ..Bundle::new(name)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bundle_root_under_plugin_path_reports_error() {
    let feeds = Arc::new(Feeds::default());
    feeds.push("x", json!({"a": 1}));
    let registry = registry(&feeds);
    let store = Arc::new(Store::new());

    let raw = json!({"data.x": {"type": "mock", "feed": "x", "polling_interval": "10ms"}});
    let mut plugins = DataPlugins::new(context(&store), validate(&registry, &raw).unwrap());
    plugins.start().await.unwrap();
    wait_for_value(&store, &path!["data", "x"], &json!({"a": 1})).await;
    assert_eq!(plugins.status().unwrap().status, Status::Ok);

    // The bundle declares a root inside the plugin's path but keeps its data
    // elsewhere, so activation itself succeeds.
    let overlay = bundle("overlay", &["data/x/y", "static"], json!({"static": {"v": 1}}));
    activate(&store, &[overlay]).await.unwrap();

    let status = plugins.status().unwrap();
    assert_eq!(status.status, Status::Error);
    let message = status.message.unwrap();
    assert!(message.contains("data.x"), "{message}");
    assert!(message.contains("overlay"), "{message}");

    assert_eq!(store.read_one(&path!["data", "x"]).await.unwrap(), json!({"a": 1}));
    assert_eq!(store.read_one(&path!["static"]).await.unwrap(), json!({"v": 1}));

    deactivate(&store, &["overlay".to_string()]).await.unwrap();
    assert_eq!(plugins.status().unwrap().status, Status::Ok);
    assert!(store.read_one(&path!["static"]).await.unwrap_err().is_not_found());
    assert_eq!(store.read_one(&path!["data", "x"]).await.unwrap(), json!({"a": 1}));

    plugins.stop(STOP).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overlap_present_at_start_is_reported() {
    let feeds = Arc::new(Feeds::default());
    let registry = registry(&feeds);
    let store = Arc::new(Store::new());

    let catalog = bundle("catalog", &["acme"], json!({"acme": {"products": []}}));
    activate(&store, &[catalog]).await.unwrap();

    let raw = json!({"acme.live": {"type": "mock", "feed": "live"}});
    let mut plugins = DataPlugins::new(context(&store), validate(&registry, &raw).unwrap());
    plugins.start().await.unwrap();

    let status = plugins.status().unwrap();
    assert_eq!(status.status, Status::Error);
    assert!(status.message.unwrap().contains("catalog"));

    // Removing the plugin clears the overlap.
    plugins
        .reconfigure(validate(&registry, &Value::Null).unwrap())
        .await
        .unwrap();
    assert_eq!(plugins.status().unwrap().status, Status::Ok);
    assert_eq!(
        store.read_one(&path!["acme"]).await.unwrap(),
        json!({"products": []})
    );

    plugins.stop(STOP).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bundle_data_under_claim_is_refused() {
    let feeds = Arc::new(Feeds::default());
    feeds.push("x", json!({"a": 1}));
    let registry = registry(&feeds);
    let store = Arc::new(Store::new());

    let raw = json!({"data.x": {"type": "mock", "feed": "x", "polling_interval": "10ms"}});
    let mut plugins = DataPlugins::new(context(&store), validate(&registry, &raw).unwrap());
    plugins.start().await.unwrap();
    wait_for_value(&store, &path!["data", "x"], &json!({"a": 1})).await;

    let intruder = bundle("intruder", &["data/x/y"], json!({"data": {"x": {"y": 2}}}));
    match activate(&store, &[intruder]).await.unwrap_err() {
        BundleError::Store(StoreError::PathOwned { plugin, .. }) => assert_eq!(plugin, "data.x"),
        other => panic!("expected PathOwned, got {other:?}"),
    }

    // Nothing from the failed activation is visible.
    assert_eq!(store.read_one(&path!["data", "x"]).await.unwrap(), json!({"a": 1}));
    assert!(store
        .read_one(&path!["system", "bundles", "intruder"])
        .await
        .unwrap_err()
        .is_not_found());
    assert_eq!(plugins.status().unwrap().status, Status::Ok);

    plugins.stop(STOP).await;
}
