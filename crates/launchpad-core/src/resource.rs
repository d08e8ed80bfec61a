//! Declared infrastructure resources.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::{Error, Result};

/// Kind of infrastructure unit a resource declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Network,
    Registry,
    Cluster,
    Service,
    LoadBalancer,
    Listener,
    Certificate,
    DnsRecord,
    Bucket,
    Role,
    BuildProject,
    Pipeline,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 12] = [
        ResourceKind::Network,
        ResourceKind::Registry,
        ResourceKind::Cluster,
        ResourceKind::Service,
        ResourceKind::LoadBalancer,
        ResourceKind::Listener,
        ResourceKind::Certificate,
        ResourceKind::DnsRecord,
        ResourceKind::Bucket,
        ResourceKind::Role,
        ResourceKind::BuildProject,
        ResourceKind::Pipeline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Registry => "registry",
            ResourceKind::Cluster => "cluster",
            ResourceKind::Service => "service",
            ResourceKind::LoadBalancer => "load-balancer",
            ResourceKind::Listener => "listener",
            ResourceKind::Certificate => "certificate",
            ResourceKind::DnsRecord => "dns-record",
            ResourceKind::Bucket => "bucket",
            ResourceKind::Role => "role",
            ResourceKind::BuildProject => "build-project",
            ResourceKind::Pipeline => "pipeline",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown resource kind: {}", s)))
    }
}

/// Identity of a resource: its kind plus a logical name unique within that kind.
///
/// Serialized as `kind.name` so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl std::str::FromStr for ResourceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, name) = s
            .split_once('.')
            .ok_or_else(|| Error::InvalidInput(format!("expected kind.name, got: {}", s)))?;
        if name.is_empty() {
            return Err(Error::InvalidInput(format!("empty resource name in: {}", s)));
        }
        Ok(Self::new(kind.parse()?, name))
    }
}

impl TryFrom<String> for ResourceKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ResourceKey> for String {
    fn from(key: ResourceKey) -> Self {
        key.to_string()
    }
}

/// Lifecycle of a resource as it is materialized by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Planned,
    Creating,
    Active,
    Updating,
    Deleting,
    Failed,
}

impl LifecycleState {
    /// Whether `next` is a documented transition from this state.
    ///
    /// `Creating -> Active` and `Updating -> Active` are only taken once the
    /// provider confirmed the resource is ready.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Planned, Creating)
                | (Creating, Active)
                | (Creating, Failed)
                | (Active, Updating)
                | (Active, Deleting)
                | (Updating, Active)
                | (Updating, Failed)
                | (Deleting, Failed)
                | (Failed, Creating)
                | (Failed, Updating)
                | (Failed, Deleting)
        )
    }

    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            LifecycleState::Creating | LifecycleState::Updating | LifecycleState::Deleting
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Planned => write!(f, "planned"),
            LifecycleState::Creating => write!(f, "creating"),
            LifecycleState::Active => write!(f, "active"),
            LifecycleState::Updating => write!(f, "updating"),
            LifecycleState::Deleting => write!(f, "deleting"),
            LifecycleState::Failed => write!(f, "failed"),
        }
    }
}

/// A declared infrastructure unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub key: ResourceKey,
    /// Declared attributes, possibly containing `${kind.name.output}` references.
    pub attributes: BTreeMap<String, String>,
    pub depends_on: BTreeSet<ResourceKey>,
    #[serde(default)]
    pub state: LifecycleState,
}

impl Resource {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            key: ResourceKey::new(kind, name),
            attributes: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            state: LifecycleState::Planned,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_dependency(mut self, dependency: ResourceKey) -> Self {
        self.depends_on.insert(dependency);
        self
    }

    /// Same attributes and dependencies, ignoring lifecycle state.
    pub fn same_declaration(&self, other: &Resource) -> bool {
        self.key == other.key
            && self.attributes == other.attributes
            && self.depends_on == other.depends_on
    }

    /// Move to `next`, rejecting transitions outside the documented lifecycle.
    pub fn transition(&mut self, next: LifecycleState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                resource: self.key.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}
