//! Reconciliation, pipeline orchestration and rollouts for Launchpad.
//!
//! - [`StateReconciler`] diffs declared resources against an applied
//!   snapshot and drives the provider one operation at a time.
//! - [`PipelineOrchestrator`] runs fetch, build, push and deploy for a
//!   trigger.
//! - [`RolloutController`] moves a service to new images and waits for it to
//!   become healthy.
//! - [`RunDispatcher`] serializes runs per branch and keeps the latest one.

pub mod dispatcher;
pub mod orchestrator;
pub mod reconciler;
pub mod rollout;

#[cfg(test)]
mod testing;

pub use dispatcher::{RunDispatcher, RunHistory};
pub use orchestrator::{DeployTarget, PipelineEvent, PipelineOrchestrator};
pub use reconciler::{ApplyFailure, ApplyReport, RefreshReport, StateReconciler};
pub use rollout::{RolloutController, RolloutPolicy, RolloutReport};
