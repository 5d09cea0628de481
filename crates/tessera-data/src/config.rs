// config.rs — Validation of the data plugin configuration.
//
// The raw configuration maps dotted path keys to entries:
//
//   kafka.updates:
//     type: kafka
//     polling_interval: 30s
//     rego_transform: data.kafka.transform
//     ...kind-specific fields...
//
// Entries are checked in lexicographic key order, so the reported overlap is
// the same on every run for the same input.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use tessera_store::Path;

use crate::duration::duration_from_value;
use crate::error::DataError;
use crate::registry::{Registry, SourceConfig};
use crate::transform::RuleRef;

pub const TYPE_FIELD: &str = "type";
pub const POLLING_INTERVAL_FIELD: &str = "polling_interval";
pub const TRANSFORM_FIELD: &str = "rego_transform";

/// One validated plugin entry.
#[derive(Clone)]
pub struct Entry {
    /// The configuration key, e.g. `kafka.updates`.
    pub name: String,
    /// The tree path the plugin owns.
    pub path: Path,
    pub kind: String,
    pub interval: Duration,
    pub transform: Option<RuleRef>,
    pub source: Arc<dyn SourceConfig>,
    /// The entry as written, used to tell whether it changed.
    pub raw: Value,
}

impl Entry {
    /// True when both entries were written identically.
    pub fn same_config(&self, other: &Entry) -> bool {
        self.raw == other.raw
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("interval", &self.interval)
            .field("transform", &self.transform)
            .field("source", &self.source)
            .finish()
    }
}

/// A validated configuration: at most one entry per key, no overlapping paths.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub entries: BTreeMap<String, Entry>,
}

impl Config {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Validate a raw configuration against the registered kinds. `null` is an
/// empty configuration.
pub fn validate(registry: &Registry, raw: &Value) -> Result<Config, DataError> {
    let entries = match raw {
        Value::Null => return Ok(Config::default()),
        Value::Object(map) => map,
        other => {
            return Err(DataError::Malformed {
                reason: format!("expected an object of plugin entries, got {}", type_name(other)),
            })
        }
    };

    // serde_json's Map is a BTreeMap unless preserve_order is enabled; sort
    // explicitly so the order never depends on that.
    let mut keys: Vec<&String> = entries.keys().collect();
    keys.sort();

    let mut accepted: BTreeMap<String, Entry> = BTreeMap::new();
    for key in keys {
        let path = Path::from_dotted(key).map_err(|e| DataError::InvalidConfig {
            plugin: key.clone(),
            reason: e.to_string(),
        })?;
        if let Some(existing) = accepted.values().find(|e| e.path.overlaps(&path)) {
            return Err(DataError::PathOverlap {
                first: existing.name.clone(),
                second: key.clone(),
            });
        }
        let entry = validate_entry(registry, key, path, &entries[key])?;
        accepted.insert(key.clone(), entry);
    }

    Ok(Config { entries: accepted })
}

fn validate_entry(
    registry: &Registry,
    name: &str,
    path: Path,
    raw: &Value,
) -> Result<Entry, DataError> {
    let invalid = |reason: String| DataError::InvalidConfig {
        plugin: name.to_string(),
        reason,
    };

    let Value::Object(fields) = raw else {
        return Err(invalid(format!("expected an object, got {}", type_name(raw))));
    };

    let kind = match fields.get(TYPE_FIELD) {
        Some(Value::String(kind)) => kind.clone(),
        Some(other) => return Err(invalid(format!("\"type\" must be a string, got {}", type_name(other)))),
        None => return Err(invalid("\"type\" is required".to_string())),
    };
    let factory = registry.get(&kind).ok_or_else(|| DataError::UnknownKind {
        plugin: name.to_string(),
        kind: kind.clone(),
    })?;

    let interval = match fields.get(POLLING_INTERVAL_FIELD) {
        None => factory.default_interval(),
        Some(value) => {
            let interval = duration_from_value(value).map_err(|e| invalid(format!("polling_interval: {}", e)))?;
            if interval < factory.min_interval() {
                return Err(invalid(format!(
                    "polling_interval {:?} is below the minimum {:?} for type \"{}\"",
                    interval,
                    factory.min_interval(),
                    kind
                )));
            }
            interval
        }
    };

    let transform = match fields.get(TRANSFORM_FIELD) {
        None | Some(Value::Null) => None,
        Some(Value::String(rule)) => Some(rule.parse::<RuleRef>().map_err(|e| invalid(e.to_string()))?),
        Some(other) => {
            return Err(invalid(format!(
                "rego_transform must be a string, got {}",
                type_name(other)
            )))
        }
    };

    let mut specific: Map<String, Value> = fields.clone();
    for common in [TYPE_FIELD, POLLING_INTERVAL_FIELD, TRANSFORM_FIELD] {
        specific.remove(common);
    }
    let source = factory
        .validate(&specific)
        .map_err(|e| invalid(e.to_string()))?;

    Ok(Entry {
        name: name.to_string(),
        path,
        kind,
        interval,
        transform,
        source,
        raw: raw.clone(),
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
