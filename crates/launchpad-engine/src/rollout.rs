//! Rolling new images out to a running service.

use launchpad_core::image::ImageDefinition;
use launchpad_core::service::ServiceController;
use launchpad_core::{Error, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long to wait for a service to settle on a new revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RolloutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_secs(30),
        }
    }
}

/// A rollout that reached steady state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutReport {
    pub service: String,
    pub revision: String,
    /// Health polls it took.
    pub attempts: u32,
}

/// Services with a deploy in flight.
type InFlight = Arc<Mutex<HashSet<String>>>;

/// Releases the per-service lock when the deploy finishes, fails or is dropped.
struct DeployGuard {
    in_flight: InFlight,
    service: String,
}

impl DeployGuard {
    fn acquire(in_flight: &InFlight, service: &str) -> Result<Self> {
        let mut services = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !services.insert(service.to_string()) {
            return Err(Error::DeployInProgress(service.to_string()));
        }
        Ok(Self {
            in_flight: in_flight.clone(),
            service: service.to_string(),
        })
    }
}

impl Drop for DeployGuard {
    fn drop(&mut self) {
        let mut services = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        services.remove(&self.service);
    }
}

/// Updates services to new images and waits until they are healthy.
///
/// At most one deploy per service runs at a time. A timed-out rollout is left
/// as it is; nothing is rolled back.
#[derive(Clone)]
pub struct RolloutController {
    services: Arc<dyn ServiceController>,
    policy: RolloutPolicy,
    in_flight: InFlight,
}

impl RolloutController {
    pub fn new(services: Arc<dyn ServiceController>) -> Self {
        Self {
            services,
            policy: RolloutPolicy::default(),
            in_flight: Arc::default(),
        }
    }

    pub fn with_policy(mut self, policy: RolloutPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn controller_name(&self) -> &'static str {
        self.services.name()
    }

    /// Whether a deploy for `service` is currently in flight.
    pub fn is_deploying(&self, service: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(service)
    }

    pub async fn deploy(&self, service: &str, images: &[ImageDefinition]) -> Result<RolloutReport> {
        self.deploy_until(service, images, &CancellationToken::new())
            .await
    }

    /// Like [`deploy`](Self::deploy), but gives up with `Cancelled` as soon
    /// as `cancel` fires.
    pub async fn deploy_until(
        &self,
        service: &str,
        images: &[ImageDefinition],
        cancel: &CancellationToken,
    ) -> Result<RolloutReport> {
        let _guard = DeployGuard::acquire(&self.in_flight, service)?;

        let revision = self.services.update_image(service, images).await?;
        info!(
            service,
            revision = %revision,
            controller = self.services.name(),
            "rollout started"
        );

        for attempt in 1..=self.policy.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(service, attempt, "rollout wait cancelled");
                    return Err(Error::Cancelled);
                }
                _ = tokio::time::sleep(self.policy.interval) => {}
            }

            match self.services.health(service).await {
                Ok(health) if health.is_steady(&revision) => {
                    info!(service, revision = %revision, attempt, "rollout healthy");
                    return Ok(RolloutReport {
                        service: service.to_string(),
                        revision,
                        attempts: attempt,
                    });
                }
                Ok(health) => {
                    debug!(
                        service,
                        attempt,
                        current = %health.revision,
                        healthy = health.healthy,
                        desired = health.desired,
                        stale = health.stale,
                        "rollout in progress"
                    );
                }
                Err(err) => {
                    warn!(service, attempt, error = %err, "health check failed");
                }
            }
        }

        warn!(service, revision = %revision, "rollout did not settle");
        Err(Error::RolloutTimeout {
            service: service.to_string(),
            attempts: self.policy.max_attempts,
        })
    }
}
