//! Kubernetes service controller.
//!
//! A service is a `Deployment`. Updating its image bumps
//! `metadata.generation`, which is the revision the rollout waits for.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use launchpad_core::image::ImageDefinition;
use launchpad_core::service::{ServiceController, ServiceHealth};
use launchpad_core::{Error, Result};
use serde_json::json;
use tracing::{debug, info};

const FIELD_MANAGER: &str = "launchpad";

/// Rolls images out to Deployments in one namespace.
pub struct KubernetesServiceController {
    client: Client,
    namespace: String,
}

impl KubernetesServiceController {
    pub async fn new(namespace: impl Into<String>) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::DeploymentFailed(format!("cannot connect to Kubernetes: {e}")))?;
        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    pub fn with_client(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

/// Strategic merge patch setting each named container's image.
fn image_patch(images: &[ImageDefinition]) -> serde_json::Value {
    let containers: Vec<_> = images
        .iter()
        .map(|def| json!({ "name": def.name, "image": def.image_uri }))
        .collect();
    json!({ "spec": { "template": { "spec": { "containers": containers } } } })
}

/// Health as seen by the Deployment controller.
///
/// The reported revision is the generation the controller has observed, so a
/// rollout is not steady until the controller caught up with the update.
fn deployment_health(deployment: &Deployment) -> ServiceHealth {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let status = deployment.status.clone().unwrap_or_default();
    let replicas = status.replicas.unwrap_or(0);
    let updated = status.updated_replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);

    ServiceHealth {
        revision: status.observed_generation.unwrap_or(0).to_string(),
        desired: to_count(desired),
        healthy: to_count(updated.min(available)),
        stale: to_count(replicas - updated),
    }
}

fn to_count(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

#[async_trait]
impl ServiceController for KubernetesServiceController {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn update_image(&self, service: &str, images: &[ImageDefinition]) -> Result<String> {
        if images.is_empty() {
            return Err(Error::InvalidInput(format!(
                "no image definitions for {service}"
            )));
        }

        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let patched = self
            .deployments()
            .patch(service, &params, &Patch::Strategic(image_patch(images)))
            .await
            .map_err(|e| match e {
                kube::Error::Api(resp) if resp.code == 404 => {
                    Error::NotFound(format!("deployment {}/{}", self.namespace, service))
                }
                other => Error::DeploymentFailed(format!("patch {service}: {other}")),
            })?;

        let revision = patched
            .metadata
            .generation
            .ok_or_else(|| Error::DeploymentFailed(format!("{service} has no generation")))?
            .to_string();
        info!(service, namespace = %self.namespace, revision = %revision, "image updated");
        Ok(revision)
    }

    async fn health(&self, service: &str) -> Result<ServiceHealth> {
        let deployment = self
            .deployments()
            .get(service)
            .await
            .map_err(|e| Error::DeploymentFailed(format!("get {service}: {e}")))?;
        let health = deployment_health(&deployment);
        debug!(
            service,
            revision = %health.revision,
            desired = health.desired,
            healthy = health.healthy,
            stale = health.stale,
            "service health"
        );
        Ok(health)
    }
}
