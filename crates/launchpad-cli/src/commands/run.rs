//! Run the pipeline locally, streaming its progress.

use anyhow::{Context as _, Result, bail};
use launchpad_api::bootstrap;
use launchpad_core::pipeline::Trigger;
use launchpad_core::secret::SecretStore;
use launchpad_engine::PipelineEvent;
use launchpad_state::EnvSecretStore;
use std::path::Path;
use std::sync::Arc;

use super::Context;

pub async fn run(
    ctx: &Context,
    branch: Option<String>,
    revision: Option<String>,
    work_dir: &Path,
) -> Result<()> {
    let settings = ctx.settings();
    let secrets: Arc<dyn SecretStore> = Arc::new(EnvSecretStore::new());
    let registry_uri = bootstrap::resolve_registry_uri(&ctx.manifest, &ctx.store).await?;
    let orchestrator = bootstrap::orchestrator(settings, &registry_uri, work_dir, secrets).await?;

    let branch = branch.unwrap_or_else(|| settings.branch.clone());
    println!("Running pipeline for {} ({})", branch, settings.repository.full_name());

    let (mut events, handle) = orchestrator.execute(Trigger::manual(branch, revision));
    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::PhaseChanged { run } => println!("▶ {}", run.phase),
            PipelineEvent::StageLog { stage, message, .. } => println!("  [{}] {}", stage, message),
            PipelineEvent::RunCompleted { .. } => {}
        }
    }

    let run = handle.await.context("pipeline task panicked")?;
    if let Some((stage, message)) = run.failure() {
        bail!("{} stage failed: {}", stage, message);
    }
    println!("✓ Deployed {} at {}", ctx.settings().service, run.commit_ref());
    Ok(())
}
