// transform.rs — The contract between data plugins and the policy evaluator.
//
// A data plugin may name a rule (`rego_transform: data.x.transform`) that
// reshapes each fetched batch before it is stored. The evaluator itself lives
// outside this crate; plugins only see a `TransformEngine` that can prepare a
// rule into a reusable `Transform`. Prepared transforms are dropped when
// policies change and prepared again on the next tick.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DataError;

/// A reference to a rule: `data.` followed by one or more identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RuleRef {
    segments: Vec<String>,
}

impl RuleRef {
    /// Segments after the leading `data`.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl FromStr for RuleRef {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| DataError::Rule {
            rule: s.to_string(),
            reason: reason.to_string(),
        };
        let rest = s
            .strip_prefix("data.")
            .ok_or_else(|| invalid("must start with \"data.\""))?;
        let segments: Vec<String> = rest.split('.').map(str::to_string).collect();
        if !segments.iter().all(|seg| is_identifier(seg)) {
            return Err(invalid("segments must be identifiers"));
        }
        Ok(Self { segments })
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl fmt::Display for RuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data.{}", self.segments.join("."))
    }
}

impl TryFrom<String> for RuleRef {
    type Error = DataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RuleRef> for String {
    fn from(rule: RuleRef) -> Self {
        rule.to_string()
    }
}

/// A prepared rule, evaluated once per fetched batch.
pub trait Transform: Send + Sync {
    /// `input` is `{"incoming": <batch>, "previous": <stored value or null>}`.
    fn eval(&self, input: &Value) -> Result<Value, DataError>;
}

/// Prepares rules into transforms.
pub trait TransformEngine: Send + Sync {
    fn prepare(&self, rule: &RuleRef) -> Result<Arc<dyn Transform>, DataError>;
}

/// Rejects every rule. Used when no evaluator is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransformEngine;

impl TransformEngine for NoTransformEngine {
    fn prepare(&self, rule: &RuleRef) -> Result<Arc<dyn Transform>, DataError> {
        Err(DataError::Rule {
            rule: rule.to_string(),
            reason: "no transform engine is attached".to_string(),
        })
    }
}

type TransformFn = dyn Fn(&Value) -> Result<Value, DataError> + Send + Sync;

/// Rules backed by Rust closures, keyed by their reference.
///
/// Rules may be replaced at any time; a plugin picks up the new body the next
/// time it prepares the rule.
#[derive(Default)]
pub struct FnTransformEngine {
    rules: RwLock<BTreeMap<String, Arc<TransformFn>>>,
    prepared: AtomicUsize,
}

impl FnTransformEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`FnTransformEngine::insert`].
    pub fn with<F>(self, rule: &str, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, DataError> + Send + Sync + 'static,
    {
        self.insert(rule, f);
        self
    }

    pub fn insert<F>(&self, rule: &str, f: F)
    where
        F: Fn(&Value) -> Result<Value, DataError> + Send + Sync + 'static,
    {
        self.rules.write().insert(rule.to_string(), Arc::new(f));
    }

    /// How many times any rule has been prepared.
    pub fn prepare_count(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for FnTransformEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTransformEngine")
            .field("rules", &self.rules.read().keys().collect::<Vec<_>>())
            .field("prepared", &self.prepare_count())
            .finish()
    }
}

impl TransformEngine for FnTransformEngine {
    fn prepare(&self, rule: &RuleRef) -> Result<Arc<dyn Transform>, DataError> {
        let key = rule.to_string();
        let body = self.rules.read().get(&key).cloned().ok_or_else(|| DataError::Rule {
            rule: key.clone(),
            reason: "rule is not defined".to_string(),
        })?;
        self.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FnTransform { rule: key, body }))
    }
}

struct FnTransform {
    rule: String,
    body: Arc<TransformFn>,
}

impl Transform for FnTransform {
    fn eval(&self, input: &Value) -> Result<Value, DataError> {
        (self.body)(input).map_err(|e| match e {
            DataError::Transform { .. } => e,
            other => DataError::Transform {
                rule: self.rule.clone(),
                reason: other.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn rule_ref_parsing() {
        let rule: RuleRef = "data.kafka.transform".parse().unwrap();
        assert_eq!(rule.segments(), &["kafka", "transform"]);
        assert_eq!(rule.to_string(), "data.kafka.transform");

        for bad in ["data.", "data", "kafka.transform", "data..x", "data.1x", "data.a-b"] {
            assert!(bad.parse::<RuleRef>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn no_engine_rejects() {
        let rule: RuleRef = "data.x".parse().unwrap();
        assert!(NoTransformEngine.prepare(&rule).is_err());
    }

    #[test]
    fn fn_engine_prepares_and_evaluates() {
        let engine = FnTransformEngine::new().with("data.x.count", |input| {
            let n = input["incoming"].as_array().map_or(0, Vec::len);
            Ok(json!({ "count": n }))
        });
        let rule: RuleRef = "data.x.count".parse().unwrap();
        let transform = engine.prepare(&rule).unwrap();
        let out = transform
            .eval(&json!({"incoming": [1, 2, 3], "previous": null}))
            .unwrap();
        assert_eq!(out, json!({"count": 3}));
        assert_eq!(engine.prepare_count(), 1);

        let missing: RuleRef = "data.y".parse().unwrap();
        assert!(engine.prepare(&missing).is_err());
    }
}
