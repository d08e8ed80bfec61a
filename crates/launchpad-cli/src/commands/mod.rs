//! CLI command implementations.

pub mod deploy;
pub mod infra;
pub mod run;

use anyhow::{Context as _, Result};
use launchpad_config::{Manifest, Settings, load_manifest};
use launchpad_core::provider::RemoteRecord;
use launchpad_core::state::{StateSnapshot, StateStore};
use launchpad_engine::StateReconciler;
use launchpad_provider::{HttpProvider, InMemoryProvider, ProviderClient};
use launchpad_state::FileStateStore;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::GlobalArgs;

/// Manifest, state store and provider settings shared by the commands.
pub struct Context {
    pub manifest: Manifest,
    pub store: FileStateStore,
    endpoint: Option<Url>,
    token: Option<String>,
}

impl Context {
    pub fn load(global: &GlobalArgs) -> Result<Self> {
        let manifest = load_manifest(&global.manifest)
            .with_context(|| format!("failed to load {}", global.manifest.display()))?;
        let endpoint = global
            .provider_endpoint
            .clone()
            .or_else(|| manifest.settings.provider_endpoint.clone());
        Ok(Self {
            manifest,
            store: FileStateStore::new(&global.state_dir),
            endpoint,
            token: global.provider_token.clone(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.manifest.settings
    }

    pub async fn load_state(&self) -> Result<StateSnapshot> {
        self.store
            .load(&self.settings().environment)
            .await
            .with_context(|| format!("failed to load state for {}", self.settings().environment))
    }

    pub async fn save_state(&self, snapshot: &StateSnapshot) -> Result<()> {
        let serial = self
            .store
            .save(snapshot)
            .await
            .context("failed to save state")?;
        info!(environment = %snapshot.environment, serial, "state saved");
        Ok(())
    }

    /// Reconciler against the configured control plane.
    pub fn reconciler(&self) -> Result<StateReconciler> {
        let endpoint = self.endpoint.clone().context(
            "no provider endpoint; set settings.provider-endpoint or --provider-endpoint",
        )?;
        let mut provider = HttpProvider::new(endpoint)?;
        if let Some(token) = &self.token {
            provider = provider.with_token(token.clone());
        }
        Ok(StateReconciler::new(ProviderClient::new(Arc::new(provider))))
    }

    /// Reconciler against an in-memory provider holding the recorded resources.
    pub async fn dry_run_reconciler(&self, observed: &StateSnapshot) -> StateReconciler {
        let provider = InMemoryProvider::new();
        for resource in observed.iter() {
            provider
                .insert(
                    resource.resource.key.clone(),
                    RemoteRecord {
                        remote_id: resource.remote_id.clone(),
                        attributes: resource.applied_attributes.clone(),
                        outputs: resource.outputs.clone(),
                        ready: true,
                    },
                )
                .await;
        }
        StateReconciler::new(ProviderClient::new(Arc::new(provider)))
    }
}

pub fn validate(path: &Path) -> Result<()> {
    let manifest =
        load_manifest(path).with_context(|| format!("{} is not valid", path.display()))?;

    println!(
        "Manifest is valid: {} resources for {}",
        manifest.resources.len(),
        manifest.settings.environment
    );
    for resource in manifest.resources.topological_order() {
        println!("  {}", resource.key);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cli;
    use clap::Parser;
    use launchpad_core::ResourceKey;
    use std::ffi::OsString;
    use std::str::FromStr;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
        settings {
            environment "staging"
            repository owner="acme" name="storefront"
            container "web"
            service "storefront"
        }
        resource "network" "vpc" { cidr "10.0.0.0/16" }
        resource "registry" "images" { scan "true" }
        resource "cluster" "main" depends-on="network.vpc" { }
        resource "service" "web" depends-on="cluster.main" depends-on="registry.images" {
            image "${registry.images.uri}:latest"
        }
    "#;

    fn context(dir: &TempDir) -> Context {
        let manifest = dir.path().join("launchpad.kdl");
        std::fs::write(&manifest, MANIFEST).unwrap();
        let args: Vec<OsString> = vec![
            "launchpad".into(),
            "--manifest".into(),
            manifest.into_os_string(),
            "--state-dir".into(),
            dir.path().join("state").into_os_string(),
            "plan".into(),
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        Context::load(&cli.global).unwrap()
    }

    #[test]
    fn test_validate_accepts_manifest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("launchpad.kdl");
        std::fs::write(&path, MANIFEST).unwrap();
        assert!(validate(&path).is_ok());

        std::fs::write(&path, r#"resource "network" "vpc" depends-on="cluster.main" { }"#)
            .unwrap();
        assert!(validate(&path).is_err());
    }

    #[test]
    fn test_reconciler_requires_endpoint() {
        let dir = TempDir::new().unwrap();
        let err = context(&dir).reconciler().err().unwrap();
        assert!(err.to_string().contains("provider endpoint"));
    }

    #[tokio::test]
    async fn test_dry_run_applies_whole_manifest() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let observed = ctx.load_state().await.unwrap();
        assert!(observed.is_empty());

        let reconciler = ctx.dry_run_reconciler(&observed).await;
        let plan = reconciler.plan(&ctx.manifest.resources, &observed).unwrap();
        assert_eq!(plan.summary().to_add, 4);

        let report = reconciler.apply(plan, observed).await;
        assert!(report.is_success());
        let service = ResourceKey::from_str("service.web").unwrap();
        assert_eq!(
            report.snapshot.get(&service).unwrap().resource.attributes["image"],
            "${registry.images.uri}:latest"
        );
    }

    #[tokio::test]
    async fn test_saved_state_is_planned_against() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let observed = ctx.load_state().await.unwrap();
        let reconciler = ctx.dry_run_reconciler(&observed).await;
        let plan = reconciler.plan(&ctx.manifest.resources, &observed).unwrap();
        let report = reconciler.apply(plan, observed).await;
        ctx.save_state(&report.snapshot).await.unwrap();

        let observed = ctx.load_state().await.unwrap();
        assert_eq!(observed.len(), 4);
        let reconciler = ctx.dry_run_reconciler(&observed).await;
        assert!(reconciler.plan(&ctx.manifest.resources, &observed).unwrap().is_empty());

        let destroy = reconciler.plan_destroy(&observed).unwrap();
        let report = reconciler.apply(destroy, observed).await;
        assert!(report.is_success());
        assert!(report.snapshot.is_empty());
    }
}
