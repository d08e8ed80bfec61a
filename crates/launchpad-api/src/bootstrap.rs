//! Assembly of the production pipeline from manifest settings.
//!
//! Shared by `launchpad-server` and the `launchpad` CLI.

use anyhow::{Context, Result};
use launchpad_config::{Manifest, Settings};
use launchpad_core::executor::Executor;
use launchpad_core::secret::SecretStore;
use launchpad_core::state::StateStore;
use launchpad_deployer::KubernetesServiceController;
use launchpad_engine::{DeployTarget, PipelineOrchestrator, RolloutController};
use launchpad_executor::{ContainerImageBuilder, DockerExecutor, GitSourceFetcher};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Registry repository images are pushed to.
///
/// `settings.registry-uri` wins; otherwise the `uri` output of the first
/// declared registry as recorded in the environment's applied state.
pub async fn resolve_registry_uri(manifest: &Manifest, store: &dyn StateStore) -> Result<String> {
    if let Some(uri) = &manifest.settings.registry_uri {
        return Ok(uri.clone());
    }

    let key = manifest
        .registry()
        .context("no registry-uri setting and no registry resource declared")?;
    let snapshot = store
        .load(&manifest.settings.environment)
        .await
        .context("failed to load state")?;
    let uri = snapshot
        .output(key, "uri")
        .with_context(|| format!("{} has no `uri` output yet; run `launchpad apply` first", key))?;
    Ok(uri.to_string())
}

/// Value of the configured webhook secret, if one is configured.
pub async fn webhook_secret(settings: &Settings, secrets: &dyn SecretStore) -> Result<Option<String>> {
    let Some(secret) = &settings.webhook_secret else {
        return Ok(None);
    };
    let value = secrets
        .get(secret)
        .await
        .with_context(|| format!("failed to read webhook secret {}", secret))?;
    let value = value
        .as_string()
        .with_context(|| format!("webhook secret {} must be a plain string", secret))?;
    Ok(Some(value.to_string()))
}

/// Rollout controller backed by the Kubernetes Deployment named by `service`.
pub async fn rollout_controller(settings: &Settings) -> Result<RolloutController> {
    let services = KubernetesServiceController::new(settings.namespace.clone())
        .await
        .context("failed to connect to Kubernetes")?;
    Ok(RolloutController::new(Arc::new(services)))
}

/// Orchestrator using git, Docker and Kubernetes.
pub async fn orchestrator(
    settings: &Settings,
    registry_uri: &str,
    work_dir: &Path,
    secrets: Arc<dyn SecretStore>,
) -> Result<PipelineOrchestrator> {
    let executor: Arc<dyn Executor> =
        Arc::new(DockerExecutor::new().context("failed to connect to Docker")?);

    let mut fetcher = GitSourceFetcher::new(&settings.repository, work_dir);
    if let Some(token) = &settings.token_secret {
        fetcher = fetcher.with_token(secrets.clone(), token.clone());
    }

    let mut builder = ContainerImageBuilder::new(executor, registry_uri, &settings.builder_image);
    if let Some(password) = &settings.registry_password_secret {
        builder = builder.with_registry_login(
            &settings.registry_username,
            secrets.clone(),
            password.clone(),
        );
    }

    let rollout = rollout_controller(settings).await?;
    info!(
        repository = %settings.repository.full_name(),
        registry = %registry_uri,
        service = %settings.service,
        namespace = %settings.namespace,
        "pipeline ready"
    );

    Ok(PipelineOrchestrator::new(
        Arc::new(fetcher),
        Arc::new(builder),
        rollout,
        DeployTarget {
            service: settings.service.clone(),
            container: settings.container.clone(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use launchpad_config::{VariableContext, parse_manifest};
    use launchpad_core::state::{ObservedResource, StateSnapshot};
    use launchpad_core::{Resource, ResourceKey, ResourceKind};
    use launchpad_state::{MemoryStateStore, StaticSecretStore};
    use std::collections::BTreeMap;

    const MANIFEST: &str = r#"
        settings {
            environment "production"
            repository owner="acme" name="storefront"
            container "web"
            service "storefront"
            webhook-secret "github-webhook-secret"
        }
        resource "registry" "images" { scan "true" }
    "#;

    fn manifest(kdl: &str) -> Manifest {
        parse_manifest(kdl, VariableContext::new()).unwrap()
    }

    #[tokio::test]
    async fn test_registry_uri_from_setting() {
        let kdl = MANIFEST.replace(
            r#"service "storefront""#,
            r#"service "storefront"
            registry-uri "123.dkr.ecr.us-east-1.amazonaws.com/storefront""#,
        );
        let uri = resolve_registry_uri(&manifest(&kdl), &MemoryStateStore::new())
            .await
            .unwrap();
        assert_eq!(uri, "123.dkr.ecr.us-east-1.amazonaws.com/storefront");
    }

    #[tokio::test]
    async fn test_registry_uri_from_applied_state() {
        let store = MemoryStateStore::new();
        let mut snapshot = StateSnapshot::empty("production");
        snapshot.insert(ObservedResource {
            resource: Resource::new(ResourceKind::Registry, "images"),
            remote_id: "repo-1".to_string(),
            applied_attributes: BTreeMap::new(),
            outputs: BTreeMap::from([("uri".to_string(), "registry.local/images".to_string())]),
            applied_at: Utc::now(),
        });
        store.save(&snapshot).await.unwrap();

        let uri = resolve_registry_uri(&manifest(MANIFEST), &store).await.unwrap();
        assert_eq!(uri, "registry.local/images");
        assert_eq!(
            manifest(MANIFEST).registry(),
            Some(&ResourceKey::new(ResourceKind::Registry, "images"))
        );
    }

    #[tokio::test]
    async fn test_registry_uri_requires_apply() {
        let err = resolve_registry_uri(&manifest(MANIFEST), &MemoryStateStore::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("launchpad apply"));
    }

    #[tokio::test]
    async fn test_webhook_secret_lookup() {
        let settings = manifest(MANIFEST).settings;
        let secrets = StaticSecretStore::new().with_secret("github-webhook-secret", "s3cret");
        assert_eq!(
            webhook_secret(&settings, &secrets).await.unwrap().as_deref(),
            Some("s3cret")
        );
        assert!(webhook_secret(&settings, &StaticSecretStore::new()).await.is_err());
    }
}
