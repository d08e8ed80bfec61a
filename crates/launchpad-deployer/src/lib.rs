//! Service controllers for Launchpad rollouts.
//!
//! Provides:
//! - Kubernetes (Deployment image patch + rollout health)

pub mod kubernetes;

pub use kubernetes::KubernetesServiceController;
pub use launchpad_core::service::{ServiceController, ServiceHealth};
