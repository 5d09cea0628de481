// trigger.rs — Commit triggers: callbacks run synchronously on every commit.
//
// Triggers run after a write transaction's changes are installed, while the
// committing writer still holds the exclusive tree lock. They therefore see
// the new state through a CommitView and must not open transactions on the
// same store: a read would wait for the exclusive lock the commit holds, a
// write would wait for the writer mutex. Either one deadlocks.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::StoreError;
use crate::path::Path;
use crate::store::State;
use crate::tree::{self, PatchOp};

/// One data change applied by a committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataEvent {
    pub path: Path,
    pub op: PatchOp,
    /// The written value; `Null` for removals.
    pub value: Value,
}

/// One policy change applied by a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyEvent {
    pub id: String,
    pub removed: bool,
}

/// Everything a committed transaction changed, in the order it was written.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TriggerEvent {
    pub txn_id: u64,
    pub data: Vec<DataEvent>,
    pub policy: Vec<PolicyEvent>,
}

impl TriggerEvent {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.policy.is_empty()
    }

    pub fn data_changed(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn policy_changed(&self) -> bool {
        !self.policy.is_empty()
    }
}

/// Read-only view of the store as of the commit being announced.
pub struct CommitView<'a> {
    pub(crate) state: &'a State,
}

impl<'a> CommitView<'a> {
    /// Read the committed value at `path`.
    pub fn read(&self, path: &Path) -> Result<&'a Value, StoreError> {
        tree::get(&self.state.data, path).ok_or_else(|| StoreError::not_found(path))
    }

    /// Ids of all stored policies, sorted.
    pub fn list_policies(&self) -> Vec<String> {
        self.state.policies.keys().cloned().collect()
    }

    /// Text of a stored policy.
    pub fn policy(&self, id: &str) -> Option<&'a str> {
        self.state.policies.get(id).map(String::as_str)
    }

    /// All stored policies.
    pub fn policies(&self) -> &'a BTreeMap<String, String> {
        &self.state.policies
    }
}

/// A callback invoked once per committed write transaction.
///
/// Any `Fn(&CommitView, &TriggerEvent) + Send + Sync` closure is a Trigger.
pub trait Trigger: Send + Sync {
    fn on_commit(&self, view: &CommitView<'_>, event: &TriggerEvent);
}

impl<F> Trigger for F
where
    F: Fn(&CommitView<'_>, &TriggerEvent) + Send + Sync,
{
    fn on_commit(&self, view: &CommitView<'_>, event: &TriggerEvent) {
        self(view, event)
    }
}

/// Identifies a registered trigger so it can be unregistered later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TriggerHandle {
    pub(crate) store_id: u64,
    pub(crate) id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;

    #[test]
    fn event_flags() {
        let mut event = TriggerEvent::default();
        assert!(event.is_empty());
        event.policy.push(PolicyEvent {
            id: "authz.rego".to_string(),
            removed: false,
        });
        assert!(event.policy_changed());
        assert!(!event.data_changed());
        event.data.push(DataEvent {
            path: path!["a"],
            op: PatchOp::Add,
            value: Value::Bool(true),
        });
        assert!(event.data_changed());
        assert!(!event.is_empty());
    }
}
