// common/mod.rs — Shared fixtures for the data plugin integration tests.
//
// The `mock` source kind pops batches from named in-memory feeds, so tests
// decide exactly what each tick sees. An empty feed means "no new data".

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use tessera_data::{
    DataError, NoTransformEngine, PluginContext, Registry, Source, SourceConfig, SourceFactory,
    StatusRegistry, TransformEngine,
};
use tessera_store::{Path, Store};

/// Named queues of batches. `Err` entries make the fetch fail.
#[derive(Default)]
pub struct Feeds {
    queues: Mutex<BTreeMap<String, VecDeque<Result<Value, String>>>>,
}

impl Feeds {
    pub fn push(&self, feed: &str, batch: Value) {
        self.queues
            .lock()
            .entry(feed.to_string())
            .or_default()
            .push_back(Ok(batch));
    }

    pub fn fail(&self, feed: &str, reason: &str) {
        self.queues
            .lock()
            .entry(feed.to_string())
            .or_default()
            .push_back(Err(reason.to_string()));
    }

    pub fn pending(&self, feed: &str) -> usize {
        self.queues.lock().get(feed).map_or(0, VecDeque::len)
    }

    fn pop(&self, feed: &str) -> Option<Result<Value, String>> {
        self.queues.lock().get_mut(feed)?.pop_front()
    }
}

pub struct MockFactory {
    pub feeds: Arc<Feeds>,
}

impl SourceFactory for MockFactory {
    fn kind(&self) -> &'static str {
        "mock"
    }

    fn default_interval(&self) -> Duration {
        Duration::from_millis(10)
    }

    fn min_interval(&self) -> Duration {
        Duration::ZERO
    }

    fn validate(&self, raw: &Map<String, Value>) -> Result<Arc<dyn SourceConfig>, DataError> {
        match raw.get("feed") {
            Some(Value::String(feed)) => Ok(Arc::new(MockConfig {
                feed: feed.clone(),
                feeds: Arc::clone(&self.feeds),
            })),
            _ => Err(DataError::Field {
                field: "feed".to_string(),
                reason: "is required".to_string(),
            }),
        }
    }
}

pub struct MockConfig {
    feed: String,
    feeds: Arc<Feeds>,
}

impl std::fmt::Debug for MockConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConfig").field("feed", &self.feed).finish()
    }
}

impl SourceConfig for MockConfig {
    fn new_source(&self) -> Result<Box<dyn Source>, DataError> {
        Ok(Box::new(MockSource {
            feed: self.feed.clone(),
            feeds: Arc::clone(&self.feeds),
        }))
    }
}

struct MockSource {
    feed: String,
    feeds: Arc<Feeds>,
}

#[async_trait]
impl Source for MockSource {
    async fn fetch(&mut self) -> Result<Option<Value>, DataError> {
        match self.feeds.pop(&self.feed) {
            None => Ok(None),
            Some(Ok(batch)) => Ok(Some(batch)),
            Some(Err(reason)) => Err(DataError::Fetch { reason }),
        }
    }
}

/// Built-in kinds plus `mock`.
pub fn registry(feeds: &Arc<Feeds>) -> Registry {
    let mut registry = Registry::with_builtin();
    registry
        .register(Arc::new(MockFactory {
            feeds: Arc::clone(feeds),
        }))
        .unwrap();
    registry
}

pub fn context(store: &Arc<Store>) -> PluginContext {
    context_with(store, Arc::new(NoTransformEngine))
}

pub fn context_with(store: &Arc<Store>, engine: Arc<dyn TransformEngine>) -> PluginContext {
    PluginContext {
        store: Arc::clone(store),
        engine,
        status: Arc::new(StatusRegistry::new()),
    }
}

/// Poll the store until `path` holds `expected`, or panic after five seconds.
pub async fn wait_for_value(store: &Store, path: &Path, expected: &Value) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = store.read_one(path).await;
        if matches!(&current, Ok(value) if value == expected) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {} = {}, last read {:?}", path, expected, current);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until `check` holds, or panic after five seconds.
pub async fn wait_until<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
