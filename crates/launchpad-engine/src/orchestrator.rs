//! Pipeline orchestrator: fetch, build, push and deploy for one trigger.

use launchpad_core::image::{
    ImageBuilder, ImageDefinition, LATEST_TAG, image_definitions_json, image_tag,
};
use launchpad_core::pipeline::{PipelineRun, RunPhase, RunStatus, StageName, Trigger};
use launchpad_core::source::SourceFetcher;
use launchpad_core::{Error, Result, Uid};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::rollout::RolloutController;

/// Artifact handed to the deploy step, written next to the fetched source.
pub const IMAGE_DEFINITIONS_FILE: &str = "imagedefinitions.json";

/// Service and container a pipeline deploys to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTarget {
    pub service: String,
    /// Container name inside the service that receives the new image.
    pub container: String,
}

/// Event emitted during a run.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// The run moved to a new phase; carries a snapshot of the run.
    PhaseChanged { run: PipelineRun },
    StageLog {
        run_id: Uid,
        stage: StageName,
        message: String,
    },
    RunCompleted { run_id: Uid, status: RunStatus },
}

/// Drives runs through `Triggered -> Fetching -> Building -> Pushing ->
/// Deploying -> Succeeded`. Any stage failure halts the run; nothing is
/// retried.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    fetcher: Arc<dyn SourceFetcher>,
    builder: Arc<dyn ImageBuilder>,
    rollout: RolloutController,
    target: DeployTarget,
    cancel: CancellationToken,
}

impl PipelineOrchestrator {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        builder: Arc<dyn ImageBuilder>,
        rollout: RolloutController,
        target: DeployTarget,
    ) -> Self {
        Self {
            fetcher,
            builder,
            rollout,
            target,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort the rollout wait of in-flight runs when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn target(&self) -> &DeployTarget {
        &self.target
    }

    /// Start a run in the background, returning its events and a handle to
    /// the finished run.
    pub fn execute(
        &self,
        trigger: Trigger,
    ) -> (
        mpsc::Receiver<PipelineEvent>,
        tokio::task::JoinHandle<PipelineRun>,
    ) {
        let (tx, rx) = mpsc::channel(100);
        let orchestrator = self.clone();
        let handle = tokio::spawn(async move { orchestrator.run(trigger, &tx).await });
        (rx, handle)
    }

    /// Run a trigger to completion. The fetched checkout is removed once the
    /// run ends, whatever its outcome.
    pub async fn run(&self, trigger: Trigger, events: &mpsc::Sender<PipelineEvent>) -> PipelineRun {
        let mut run = PipelineRun::new(trigger);
        info!(
            run_id = %run.id,
            branch = %run.trigger.branch,
            commit = %run.commit_ref(),
            "run triggered"
        );

        let mut checkout = None;
        if let Err(err) = self.run_stages(&mut run, &mut checkout, events).await {
            let stage = run.fail(err.to_string());
            error!(run_id = %run.id, stage = ?stage, error = %err, "run failed");
            let _ = events
                .send(PipelineEvent::PhaseChanged { run: run.clone() })
                .await;
        }
        if let Some(path) = checkout {
            remove_checkout(&path).await;
        }

        info!(run_id = %run.id, status = ?run.status(), "run completed");
        let _ = events
            .send(PipelineEvent::RunCompleted {
                run_id: run.id,
                status: run.status(),
            })
            .await;
        run
    }

    async fn run_stages(
        &self,
        run: &mut PipelineRun,
        checkout: &mut Option<PathBuf>,
        events: &mpsc::Sender<PipelineEvent>,
    ) -> Result<()> {
        self.advance(run, RunPhase::Fetching, events).await?;
        let source = self
            .fetcher
            .fetch(&run.trigger.branch, run.trigger.revision.as_deref())
            .await?;
        *checkout = Some(source.path.clone());
        let revision = source
            .resolved_revision()
            .ok_or_else(|| Error::NotFound("resolved revision in fetched source".to_string()))?
            .to_string();
        log(
            run,
            StageName::Source,
            format!("fetched {} at {}", run.trigger.branch, revision),
            events,
        )
        .await;
        run.revision = Some(revision);

        self.advance(run, RunPhase::Building, events).await?;
        let tag = image_tag(run.revision.as_deref());
        run.image_tag = Some(tag.clone());
        let image = self.builder.build(&source, &tag).await?;
        log(run, StageName::Build, format!("built {}", image.uri()), events).await;

        self.advance(run, RunPhase::Pushing, events).await?;
        let tags = push_tags(&tag);
        self.builder.push(&image, &tags).await?;
        log(
            run,
            StageName::Build,
            format!("pushed {} as {}", image.repository, tags.join(", ")),
            events,
        )
        .await;

        self.advance(run, RunPhase::Deploying, events).await?;
        let definitions = vec![ImageDefinition::new(&self.target.container, image.uri())];
        write_image_definitions(&source.path, &definitions).await?;
        run.image_definitions = definitions.clone();
        let report = self
            .rollout
            .deploy_until(&self.target.service, &definitions, &self.cancel)
            .await?;
        log(
            run,
            StageName::Deploy,
            format!(
                "{} healthy at revision {} after {} checks",
                report.service, report.revision, report.attempts
            ),
            events,
        )
        .await;

        self.advance(run, RunPhase::Succeeded, events).await
    }

    async fn advance(
        &self,
        run: &mut PipelineRun,
        next: RunPhase,
        events: &mpsc::Sender<PipelineEvent>,
    ) -> Result<()> {
        run.advance(next)?;
        info!(run_id = %run.id, phase = %next, "phase changed");
        let _ = events
            .send(PipelineEvent::PhaseChanged { run: run.clone() })
            .await;
        Ok(())
    }
}

async fn log(
    run: &PipelineRun,
    stage: StageName,
    message: String,
    events: &mpsc::Sender<PipelineEvent>,
) {
    info!(run_id = %run.id, stage = %stage, "{}", message);
    let _ = events
        .send(PipelineEvent::StageLog {
            run_id: run.id,
            stage,
            message,
        })
        .await;
}

async fn remove_checkout(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => info!(path = %path.display(), "checkout removed"),
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove checkout"),
    }
}

/// `latest` plus the revision tag.
fn push_tags(tag: &str) -> Vec<String> {
    let mut tags = vec![LATEST_TAG.to_string()];
    if tag != LATEST_TAG {
        tags.push(tag.to_string());
    }
    tags
}

async fn write_image_definitions(dir: &Path, definitions: &[ImageDefinition]) -> Result<()> {
    let json = image_definitions_json(definitions)
        .map_err(|e| Error::Internal(format!("serialize image definitions: {e}")))?;
    let path = dir.join(IMAGE_DEFINITIONS_FILE);
    tokio::fs::write(&path, json)
        .await
        .map_err(|e| Error::ExecutionFailed(format!("write {}: {e}", path.display())))
}
