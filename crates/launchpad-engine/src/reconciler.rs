//! Reconciliation of declared resources against an applied snapshot.
//!
//! Planning is pure: it compares a [`ResourceGraph`] with a
//! [`StateSnapshot`] and produces an ordered [`Plan`]. Applying walks the
//! plan one operation at a time through the [`ProviderClient`], threading
//! the snapshot by value so the caller always gets back what converged.

use chrono::Utc;
use launchpad_core::graph::ResourceGraph;
use launchpad_core::operation::{Operation, OperationKind, Plan};
use launchpad_core::provider::{ProviderError, ResourceRequest};
use launchpad_core::reference::resolve_references;
use launchpad_core::state::{ObservedResource, StateSnapshot};
use launchpad_core::{Error, LifecycleState, Resource, ResourceKey, Result};
use launchpad_provider::ProviderClient;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// Operation that stopped an apply, and why.
#[derive(Debug)]
pub struct ApplyFailure {
    pub operation: Operation,
    pub error: Error,
}

impl ApplyFailure {
    pub fn resource(&self) -> &ResourceKey {
        self.operation.key()
    }

    /// Classified provider failure, if the provider rejected the operation.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match &self.error {
            Error::Provider { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Outcome of [`StateReconciler::apply`].
#[derive(Debug)]
pub struct ApplyReport {
    /// Observed state after the operations that completed.
    pub snapshot: StateSnapshot,
    pub applied: Vec<Operation>,
    /// Operations never attempted because an earlier one failed.
    pub skipped: Vec<Operation>,
    pub failure: Option<ApplyFailure>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Outcome of [`StateReconciler::refresh`].
#[derive(Debug)]
pub struct RefreshReport {
    pub snapshot: StateSnapshot,
    /// Resources the provider no longer knows about.
    pub dropped: Vec<ResourceKey>,
}

/// Plans and applies changes for one environment.
pub struct StateReconciler {
    client: ProviderClient,
    sequence: AtomicU64,
}

impl StateReconciler {
    pub fn new(client: ProviderClient) -> Self {
        Self {
            client,
            sequence: AtomicU64::new(1),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Diff `desired` against `observed`.
    ///
    /// Creates and updates come first, in dependency order. A resource whose
    /// declaration is unchanged is still updated when its references now
    /// resolve to different values. Deletes follow in reverse dependency order. Nothing is planned if any resource would be
    /// deleted while a surviving resource still depends on it.
    pub fn plan(&self, desired: &ResourceGraph, observed: &StateSnapshot) -> Result<Plan> {
        for resource in desired.iter() {
            for dependency in &resource.depends_on {
                if !desired.contains(dependency) && !observed.contains(dependency) {
                    return Err(Error::UnknownDependency {
                        resource: resource.key.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        let removed: Vec<&ObservedResource> = observed
            .iter()
            .filter(|entry| !desired.contains(&entry.resource.key))
            .collect();
        for entry in &removed {
            if let Some(dependent) = desired.dependents(&entry.resource.key).first() {
                return Err(Error::DependencyConflict {
                    resource: entry.resource.key.clone(),
                    dependent: dependent.key.clone(),
                });
            }
        }
        let removal = ResourceGraph::from_resources(
            removed.iter().map(|entry| entry.resource.clone()),
        )?;

        let mut changes: Vec<(OperationKind, Resource)> = Vec::new();
        for resource in desired.topological_order() {
            let kind = match observed.get(&resource.key) {
                None => Some(OperationKind::Create),
                Some(current)
                    if current.resource.state == LifecycleState::Failed
                        || !current.resource.same_declaration(resource)
                        || references_drifted(resource, current, observed) =>
                {
                    Some(OperationKind::Update)
                }
                Some(_) => None,
            };
            if let Some(kind) = kind {
                changes.push((kind, resource.clone()));
            }
        }
        for resource in removal.reverse_topological_order() {
            changes.push((OperationKind::Delete, resource.clone()));
        }

        let operations: Vec<Operation> = changes
            .into_iter()
            .map(|(kind, resource)| Operation::new(self.next_sequence(), kind, resource))
            .collect();
        let plan = Plan::new(operations);
        debug!(environment = %observed.environment, summary = %plan.summary(), "planned");
        Ok(plan)
    }

    /// Plan the removal of everything in `observed`.
    pub fn plan_destroy(&self, observed: &StateSnapshot) -> Result<Plan> {
        self.plan(&ResourceGraph::new(), observed)
    }

    /// Execute `plan` in order against `observed`.
    ///
    /// Stops at the first failure. Operations that completed stay applied and
    /// are reflected in the returned snapshot.
    pub async fn apply(&self, plan: Plan, observed: StateSnapshot) -> ApplyReport {
        let mut snapshot = observed;
        let mut applied = Vec::new();
        let mut pending = plan.into_iter();

        while let Some(operation) = pending.next() {
            info!(
                sequence = operation.sequence(),
                operation = %operation.kind(),
                resource = %operation.key(),
                "applying"
            );
            if let Err(err) = self.execute(&operation, &mut snapshot).await {
                let skipped: Vec<Operation> = pending.collect();
                error!(
                    sequence = operation.sequence(),
                    resource = %operation.key(),
                    error = %err,
                    skipped = skipped.len(),
                    "operation failed"
                );
                return ApplyReport {
                    snapshot,
                    applied,
                    skipped,
                    failure: Some(ApplyFailure {
                        operation,
                        error: err,
                    }),
                };
            }
            applied.push(operation);
        }

        info!(environment = %snapshot.environment, applied = applied.len(), "apply complete");
        ApplyReport {
            snapshot,
            applied,
            skipped: Vec::new(),
            failure: None,
        }
    }

    /// Re-read every observed resource, dropping those that no longer exist.
    pub async fn refresh(&self, observed: StateSnapshot) -> Result<RefreshReport> {
        let entries: Vec<ObservedResource> = observed.iter().cloned().collect();
        let mut snapshot = observed;
        let mut dropped = Vec::new();

        for mut entry in entries {
            let key = entry.resource.key.clone();
            let request = ResourceRequest::new(key.clone(), entry.applied_attributes.clone())
                .with_remote_id(entry.remote_id.clone());
            match self.client.read(&request).await {
                Ok(record) => {
                    entry.remote_id = record.remote_id;
                    entry.outputs = record.outputs;
                    snapshot.insert(entry);
                }
                Err(ProviderError::NotFound(_)) => {
                    warn!(resource = %key, "resource no longer exists remotely");
                    snapshot.remove(&key);
                    dropped.push(key);
                }
                Err(source) => return Err(provider_error(&key, source)),
            }
        }

        Ok(RefreshReport { snapshot, dropped })
    }

    async fn execute(&self, operation: &Operation, snapshot: &mut StateSnapshot) -> Result<()> {
        match operation.kind() {
            OperationKind::Create => self.create(operation.resource(), snapshot).await,
            OperationKind::Update => self.update(operation.resource(), snapshot).await,
            OperationKind::Delete => self.delete(operation.key(), snapshot).await,
        }
    }

    async fn create(&self, declared: &Resource, snapshot: &mut StateSnapshot) -> Result<()> {
        let mut resource = declared.clone();
        resource.state = LifecycleState::Planned;
        let attributes = resolve_attributes(&resource, snapshot)?;

        resource.transition(LifecycleState::Creating)?;
        let request = ResourceRequest::new(resource.key.clone(), attributes.clone());
        let record = self
            .client
            .create(&request)
            .await
            .map_err(|source| provider_error(&resource.key, source))?;
        resource.transition(LifecycleState::Active)?;

        snapshot.insert(ObservedResource {
            resource,
            remote_id: record.remote_id,
            applied_attributes: attributes,
            outputs: record.outputs,
            applied_at: Utc::now(),
        });
        Ok(())
    }

    async fn update(&self, declared: &Resource, snapshot: &mut StateSnapshot) -> Result<()> {
        let current = snapshot
            .get(&declared.key)
            .cloned()
            .ok_or_else(|| missing_state(&declared.key))?;
        let mut resource = declared.clone();
        resource.state = current.resource.state;
        let attributes = resolve_attributes(&resource, snapshot)?;

        resource.transition(LifecycleState::Updating)?;
        let request = ResourceRequest::new(resource.key.clone(), attributes.clone())
            .with_remote_id(current.remote_id.clone());
        match self.client.update(&request).await {
            Ok(record) => {
                resource.transition(LifecycleState::Active)?;
                snapshot.insert(ObservedResource {
                    resource,
                    remote_id: record.remote_id,
                    applied_attributes: attributes,
                    outputs: record.outputs,
                    applied_at: Utc::now(),
                });
                Ok(())
            }
            Err(source) => {
                resource.transition(LifecycleState::Failed)?;
                let mut failed = current;
                failed.resource.state = resource.state;
                snapshot.insert(failed);
                Err(provider_error(&resource.key, source))
            }
        }
    }

    async fn delete(&self, key: &ResourceKey, snapshot: &mut StateSnapshot) -> Result<()> {
        let current = snapshot.get(key).cloned().ok_or_else(|| missing_state(key))?;
        let mut resource = current.resource.clone();

        resource.transition(LifecycleState::Deleting)?;
        let request = ResourceRequest::new(key.clone(), current.applied_attributes.clone())
            .with_remote_id(current.remote_id.clone());
        match self.client.delete(&request).await {
            Ok(()) => {
                snapshot.remove(key);
                Ok(())
            }
            Err(source) => {
                resource.transition(LifecycleState::Failed)?;
                let mut failed = current;
                failed.resource = resource;
                snapshot.insert(failed);
                Err(provider_error(key, source))
            }
        }
    }
}

/// Declared attributes with every `${kind.name.output}` substituted from
/// already-applied resources.
fn resolve_attributes(
    resource: &Resource,
    snapshot: &StateSnapshot,
) -> Result<BTreeMap<String, String>> {
    resource
        .attributes
        .iter()
        .map(|(name, value)| {
            let resolved = resolve_references(value, |key, output| snapshot.output(key, output))
                .map_err(|reference| Error::UnresolvedReference {
                    resource: resource.key.clone(),
                    reference: reference.to_string(),
                })?;
            Ok((name.clone(), resolved))
        })
        .collect()
}

/// Whether `resource`'s references resolve differently from what was last
/// applied. A reference that no longer resolves counts as drift.
fn references_drifted(
    resource: &Resource,
    current: &ObservedResource,
    observed: &StateSnapshot,
) -> bool {
    match resolve_attributes(resource, observed) {
        Ok(resolved) => resolved != current.applied_attributes,
        Err(_) => true,
    }
}

fn provider_error(key: &ResourceKey, source: ProviderError) -> Error {
    Error::Provider {
        resource: key.clone(),
        source,
    }
}

fn missing_state(key: &ResourceKey) -> Error {
    Error::NotFound(format!("no applied state for {}", key))
}
