//! Running services and the controller that rolls new images out to them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::image::ImageDefinition;

/// Health of a service as reported by its orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    /// Revision the orchestrator currently reports as deployed.
    pub revision: String,
    /// Instances the service should run.
    pub desired: u32,
    /// Instances of `revision` that are running and healthy.
    pub healthy: u32,
    /// Instances still running a previous revision.
    pub stale: u32,
}

impl ServiceHealth {
    /// Steady means every desired instance runs `revision` healthily and no
    /// old instance is left.
    pub fn is_steady(&self, revision: &str) -> bool {
        self.revision == revision && self.healthy >= self.desired && self.stale == 0
    }
}

/// Updates a running service to new images and reports its health.
#[async_trait]
pub trait ServiceController: Send + Sync {
    /// Name of this controller.
    fn name(&self) -> &'static str;

    /// Point the service's containers at the given images, returning the
    /// revision the rollout will converge to.
    async fn update_image(&self, service: &str, images: &[ImageDefinition]) -> Result<String>;

    /// Current health of the service.
    async fn health(&self, service: &str) -> Result<ServiceHealth>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(revision: &str, desired: u32, healthy: u32, stale: u32) -> ServiceHealth {
        ServiceHealth {
            revision: revision.to_string(),
            desired,
            healthy,
            stale,
        }
    }

    #[test]
    fn steady_requires_target_revision() {
        assert!(health("7", 3, 3, 0).is_steady("7"));
        assert!(!health("6", 3, 3, 0).is_steady("7"));
    }

    #[test]
    fn stale_or_missing_instances_are_not_steady() {
        assert!(!health("7", 3, 2, 0).is_steady("7"));
        assert!(!health("7", 3, 3, 1).is_steady("7"));
    }

    #[test]
    fn scaled_to_zero_is_steady() {
        assert!(health("7", 0, 0, 0).is_steady("7"));
    }
}
