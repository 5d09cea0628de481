// status.rs — Component health as reported to operators.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    NotReady,
    Ok,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::NotReady => write!(f, "not_ready"),
            Status::Ok => write!(f, "ok"),
            Status::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Latest status per component name.
#[derive(Debug, Default)]
pub struct StatusRegistry {
    components: RwLock<BTreeMap<String, ComponentStatus>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a component's status. Transitions are logged; repeating the
    /// current status and message only refreshes the timestamp.
    pub fn set(&self, component: &str, status: Status, message: Option<String>) {
        let mut components = self.components.write();
        let changed = components
            .get(component)
            .map_or(true, |prev| prev.status != status || prev.message != message);
        if changed {
            match (status, &message) {
                (Status::Error, Some(msg)) => {
                    tracing::error!(component, status = %status, message = %msg, "status changed")
                }
                (_, Some(msg)) => tracing::info!(component, status = %status, message = %msg, "status changed"),
                (_, None) => tracing::info!(component, status = %status, "status changed"),
            }
        }
        components.insert(
            component.to_string(),
            ComponentStatus {
                status,
                message,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, component: &str) -> Option<ComponentStatus> {
        self.components.read().get(component).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, ComponentStatus> {
        self.components.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let registry = StatusRegistry::new();
        assert!(registry.get("data").is_none());
        registry.set("data", Status::Ok, None);
        registry.set("data", Status::Error, Some("boom".to_string()));
        let status = registry.get("data").unwrap();
        assert_eq!(status.status, Status::Error);
        assert_eq!(status.message.as_deref(), Some("boom"));
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Status::NotReady).unwrap(), "\"not_ready\"");
        assert_eq!(Status::Ok.to_string(), "ok");
    }
}
