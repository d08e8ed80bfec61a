//! Error types for Launchpad.

use thiserror::Error;

use crate::pipeline::StageName;
use crate::provider::ProviderError;
use crate::resource::{LifecycleState, ResourceKey};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cyclic dependency: {}", format_path(.path))]
    CyclicDependency { path: Vec<ResourceKey> },

    #[error("cannot delete {resource}: still required by {dependent}")]
    DependencyConflict {
        resource: ResourceKey,
        dependent: ResourceKey,
    },

    #[error("{resource} depends on undeclared resource {dependency}")]
    UnknownDependency {
        resource: ResourceKey,
        dependency: ResourceKey,
    },

    #[error("duplicate resource: {0}")]
    DuplicateResource(ResourceKey),

    #[error("invalid lifecycle transition for {resource}: {from} -> {to}")]
    InvalidTransition {
        resource: ResourceKey,
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("unresolved reference `{reference}` in {resource}")]
    UnresolvedReference {
        resource: ResourceKey,
        reference: String,
    },

    #[error("{resource}: {source}")]
    Provider {
        resource: ResourceKey,
        #[source]
        source: ProviderError,
    },

    #[error("rollout of {service} not healthy after {attempts} attempts")]
    RolloutTimeout { service: String, attempts: u32 },

    #[error("deploy already in progress for {0}")]
    DeployInProgress(String),

    #[error("stage {stage} failed: {message}")]
    StageFailed { stage: StageName, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("deployment failed: {0}")]
    DeploymentFailed(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("run queue for {0} is full")]
    QueueFull(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors detected from declarations alone, before anything reaches a provider.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::CyclicDependency { .. }
                | Error::DependencyConflict { .. }
                | Error::UnknownDependency { .. }
                | Error::DuplicateResource(_)
        )
    }
}

fn format_path(path: &[ResourceKey]) -> String {
    path.iter()
        .map(|key| key.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type Result<T> = std::result::Result<T, Error>;
