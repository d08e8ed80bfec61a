//! Applied state snapshots and their storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::resource::{Resource, ResourceKey};
use crate::Result;

/// A resource as it was last applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedResource {
    /// Declaration that was applied, including its lifecycle state.
    pub resource: Resource,
    pub remote_id: String,
    /// Attributes as last sent to the provider, references resolved.
    #[serde(default)]
    pub applied_attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    pub applied_at: DateTime<Utc>,
}

/// Last-known applied state for one environment.
///
/// Passed by value into planning and returned from apply; there is no shared
/// mutable copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub environment: String,
    /// Incremented by the state store on every save.
    #[serde(default)]
    pub serial: u64,
    #[serde(default)]
    resources: BTreeMap<ResourceKey, ObservedResource>,
}

impl StateSnapshot {
    pub fn empty(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            serial: 0,
            resources: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&ObservedResource> {
        self.resources.get(key)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.resources.contains_key(key)
    }

    pub fn insert(&mut self, observed: ObservedResource) {
        self.resources.insert(observed.resource.key.clone(), observed);
    }

    pub fn remove(&mut self, key: &ResourceKey) -> Option<ObservedResource> {
        self.resources.remove(key)
    }

    /// Observed resources ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = &ObservedResource> {
        self.resources.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.resources.keys()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// A single output of an applied resource.
    pub fn output(&self, key: &ResourceKey, name: &str) -> Option<&str> {
        self.resources
            .get(key)
            .and_then(|observed| observed.outputs.get(name))
            .map(String::as_str)
    }
}

/// Persistence for state snapshots, keyed by environment.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the snapshot for an environment; empty if nothing was saved yet.
    async fn load(&self, environment: &str) -> Result<StateSnapshot>;

    /// Persist a snapshot, returning the new serial.
    async fn save(&self, snapshot: &StateSnapshot) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut snapshot = StateSnapshot::empty("production");
        snapshot.insert(ObservedResource {
            resource: Resource::new(ResourceKind::Registry, "images").with_attribute("scan", "true"),
            remote_id: "repo-123".to_string(),
            applied_attributes: BTreeMap::from([("scan".to_string(), "true".to_string())]),
            outputs: BTreeMap::from([("uri".to_string(), "registry.local/images".to_string())]),
            applied_at: Utc::now(),
        });

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"registry.images\""));
        let decoded: StateSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(
            decoded.output(&ResourceKey::new(ResourceKind::Registry, "images"), "uri"),
            Some("registry.local/images")
        );
    }
}
