//! Pipeline runs: fetch, build, push and deploy for one source revision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::image::ImageDefinition;
use crate::{Error, Result, Uid};

/// Phase of a run's state machine.
///
/// `Triggered -> Fetching -> Building -> Pushing -> Deploying -> Succeeded`,
/// with `Failed` reachable from every non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Triggered,
    Fetching,
    Building,
    Pushing,
    Deploying,
    Succeeded,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Succeeded | RunPhase::Failed)
    }

    /// Successor on the success path.
    pub fn next(self) -> Option<RunPhase> {
        match self {
            RunPhase::Triggered => Some(RunPhase::Fetching),
            RunPhase::Fetching => Some(RunPhase::Building),
            RunPhase::Building => Some(RunPhase::Pushing),
            RunPhase::Pushing => Some(RunPhase::Deploying),
            RunPhase::Deploying => Some(RunPhase::Succeeded),
            RunPhase::Succeeded | RunPhase::Failed => None,
        }
    }

    pub fn can_advance_to(self, next: RunPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == RunPhase::Failed || self.next() == Some(next)
    }

    /// Stage this phase belongs to.
    pub fn stage(self) -> Option<StageName> {
        match self {
            RunPhase::Fetching => Some(StageName::Source),
            RunPhase::Building | RunPhase::Pushing => Some(StageName::Build),
            RunPhase::Deploying => Some(StageName::Deploy),
            _ => None,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Triggered => "triggered",
            RunPhase::Fetching => "fetching",
            RunPhase::Building => "building",
            RunPhase::Pushing => "pushing",
            RunPhase::Deploying => "deploying",
            RunPhase::Succeeded => "succeeded",
            RunPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Source,
    Build,
    Deploy,
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageName::Source => write!(f, "source"),
            StageName::Build => write!(f, "build"),
            StageName::Deploy => write!(f, "deploy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StageStatus {
    Succeeded,
    Failed { message: String },
}

/// Result of a completed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageName,
    #[serde(flatten)]
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// What started a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TriggerKind {
    Push { pusher: String },
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub branch: String,
    /// Revision named by the trigger; the fetch stage resolves the final one.
    pub revision: Option<String>,
    pub kind: TriggerKind,
}

impl Trigger {
    pub fn push(branch: impl Into<String>, revision: impl Into<String>, pusher: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            revision: Some(revision.into()),
            kind: TriggerKind::Push {
                pusher: pusher.into(),
            },
        }
    }

    pub fn manual(branch: impl Into<String>, revision: Option<String>) -> Self {
        Self {
            branch: branch.into(),
            revision,
            kind: TriggerKind::Manual,
        }
    }
}

/// One execution of fetch, build, push and deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uid,
    pub trigger: Trigger,
    pub phase: RunPhase,
    /// Completed stages in order.
    pub stages: Vec<StageResult>,
    /// Revision resolved by the fetch stage.
    pub revision: Option<String>,
    pub image_tag: Option<String>,
    pub image_definitions: Vec<ImageDefinition>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    stage_started_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(trigger: Trigger) -> Self {
        Self {
            id: Uid::new(),
            trigger,
            phase: RunPhase::Triggered,
            stages: Vec::new(),
            revision: None,
            image_tag: None,
            image_definitions: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            stage_started_at: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        match self.phase {
            RunPhase::Succeeded => RunStatus::Succeeded,
            RunPhase::Failed => RunStatus::Failed,
            _ => RunStatus::Pending,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.phase.is_terminal()
    }

    /// Commit reference identifying this run.
    pub fn commit_ref(&self) -> &str {
        self.revision
            .as_deref()
            .or(self.trigger.revision.as_deref())
            .unwrap_or(&self.trigger.branch)
    }

    /// Move to the next phase on the success path.
    ///
    /// Leaving the last phase of a stage records that stage as succeeded.
    pub fn advance(&mut self, next: RunPhase) -> Result<()> {
        if next == RunPhase::Failed || !self.phase.can_advance_to(next) {
            return Err(Error::InvalidInput(format!(
                "run {}: cannot advance from {} to {}",
                self.id, self.phase, next
            )));
        }

        let now = Utc::now();
        let leaving = self.phase.stage();
        let entering = next.stage();

        if self.phase == RunPhase::Triggered {
            self.started_at = Some(now);
        }
        if let Some(stage) = leaving.filter(|_| leaving != entering) {
            self.stages.push(StageResult {
                stage,
                status: StageStatus::Succeeded,
                started_at: self.stage_started_at.unwrap_or(now),
                finished_at: now,
            });
        }
        if entering.is_some() && entering != leaving {
            self.stage_started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }

        self.phase = next;
        Ok(())
    }

    /// Halt the run, recording the current stage as failed.
    pub fn fail(&mut self, message: impl Into<String>) -> Option<StageName> {
        if self.phase.is_terminal() {
            return None;
        }
        let now = Utc::now();
        let stage = self.phase.stage();
        if let Some(stage) = stage {
            self.stages.push(StageResult {
                stage,
                status: StageStatus::Failed {
                    message: message.into(),
                },
                started_at: self.stage_started_at.unwrap_or(now),
                finished_at: now,
            });
        }
        self.phase = RunPhase::Failed;
        self.finished_at = Some(now);
        stage
    }

    /// The failing stage and its message, if the run failed in a stage.
    pub fn failure(&self) -> Option<(StageName, &str)> {
        self.stages.iter().find_map(|result| match &result.status {
            StageStatus::Failed { message } => Some((result.stage, message.as_str())),
            StageStatus::Succeeded => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> PipelineRun {
        PipelineRun::new(Trigger::push("main", "abcdef1234567", "octocat"))
    }

    #[test]
    fn happy_path_records_three_stages() {
        let mut run = run();
        for phase in [
            RunPhase::Fetching,
            RunPhase::Building,
            RunPhase::Pushing,
            RunPhase::Deploying,
            RunPhase::Succeeded,
        ] {
            run.advance(phase).unwrap();
        }

        let stages: Vec<_> = run.stages.iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![StageName::Source, StageName::Build, StageName::Deploy]
        );
        assert!(run.stages.iter().all(|s| s.status == StageStatus::Succeeded));
        assert_eq!(run.status(), RunStatus::Succeeded);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn phases_cannot_be_skipped() {
        let mut run = run();
        run.advance(RunPhase::Fetching).unwrap();
        assert!(run.advance(RunPhase::Pushing).is_err());
        assert!(run.advance(RunPhase::Failed).is_err());
        assert_eq!(run.phase, RunPhase::Fetching);
    }

    #[test]
    fn failure_records_current_stage_and_halts() {
        let mut run = run();
        run.advance(RunPhase::Fetching).unwrap();
        run.advance(RunPhase::Building).unwrap();
        run.advance(RunPhase::Pushing).unwrap();

        assert_eq!(run.fail("registry unavailable"), Some(StageName::Build));
        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.failure(), Some((StageName::Build, "registry unavailable")));
        assert!(run.advance(RunPhase::Deploying).is_err());
        assert_eq!(run.fail("again"), None);
    }

    #[test]
    fn commit_ref_prefers_resolved_revision() {
        let mut run = PipelineRun::new(Trigger::manual("main", None));
        assert_eq!(run.commit_ref(), "main");
        run.revision = Some("0123456789".to_string());
        assert_eq!(run.commit_ref(), "0123456789");
    }
}
