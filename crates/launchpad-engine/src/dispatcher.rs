//! Per-branch run queues.
//!
//! Triggers for one branch go through a single channel with a single
//! consumer, so at most one run per branch is active and later triggers wait
//! their turn.

use launchpad_core::pipeline::{PipelineRun, Trigger};
use launchpad_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::orchestrator::{PipelineEvent, PipelineOrchestrator};

const QUEUE_CAPACITY: usize = 32;

/// Latest run per branch. A run is kept until the next run for its branch
/// replaces it.
#[derive(Debug, Default)]
pub struct RunHistory {
    latest: RwLock<HashMap<String, PipelineRun>>,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, run: PipelineRun) {
        self.latest
            .write()
            .await
            .insert(run.trigger.branch.clone(), run);
    }

    pub async fn latest(&self, branch: &str) -> Option<PipelineRun> {
        self.latest.read().await.get(branch).cloned()
    }
}

/// Routes triggers to one consumer loop per branch.
pub struct RunDispatcher {
    orchestrator: PipelineOrchestrator,
    history: Arc<RunHistory>,
    queues: Mutex<HashMap<String, mpsc::Sender<Trigger>>>,
    capacity: usize,
    tracker: TaskTracker,
}

impl RunDispatcher {
    pub fn new(orchestrator: PipelineOrchestrator, history: Arc<RunHistory>) -> Self {
        Self {
            orchestrator,
            history,
            queues: Mutex::new(HashMap::new()),
            capacity: QUEUE_CAPACITY,
            tracker: TaskTracker::new(),
        }
    }

    /// Triggers each branch may have waiting behind its active run.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn history(&self) -> &Arc<RunHistory> {
        &self.history
    }

    /// Queue a run behind any active run for the same branch.
    ///
    /// Never waits for room: a branch whose queue is full rejects the trigger
    /// with [`Error::QueueFull`].
    pub async fn submit(&self, trigger: Trigger) -> Result<()> {
        let branch = trigger.branch.clone();
        let sender = {
            let mut queues = self.queues.lock().await;
            if self.tracker.is_closed() {
                return Err(Error::Internal("dispatcher is shut down".to_string()));
            }
            queues
                .entry(branch.clone())
                .or_insert_with(|| self.spawn_consumer(&branch))
                .clone()
        };

        sender.try_send(trigger).map_err(|err| match err {
            TrySendError::Full(_) => {
                warn!(branch = %branch, "run queue full, rejecting trigger");
                Error::QueueFull(branch.clone())
            }
            TrySendError::Closed(_) => Error::Internal(format!("run queue for {} is closed", branch)),
        })?;
        debug!(branch = %branch, "trigger queued");
        Ok(())
    }

    /// Stop accepting triggers and wait for queued runs to finish.
    pub async fn shutdown(&self) {
        {
            let mut queues = self.queues.lock().await;
            self.tracker.close();
            queues.clear();
        }
        self.tracker.wait().await;
        info!("dispatcher stopped");
    }

    fn spawn_consumer(&self, branch: &str) -> mpsc::Sender<Trigger> {
        let (tx, mut rx) = mpsc::channel::<Trigger>(self.capacity);
        let orchestrator = self.orchestrator.clone();
        let history = self.history.clone();
        let branch = branch.to_string();

        self.tracker.spawn(async move {
            info!(branch = %branch, "run queue started");
            while let Some(trigger) = rx.recv().await {
                let (mut events, handle) = orchestrator.execute(trigger);
                while let Some(event) = events.recv().await {
                    match event {
                        PipelineEvent::PhaseChanged { run } => history.record(run).await,
                        PipelineEvent::StageLog {
                            run_id,
                            stage,
                            message,
                        } => debug!(run_id = %run_id, stage = %stage, "{}", message),
                        PipelineEvent::RunCompleted { .. } => {}
                    }
                }
                match handle.await {
                    Ok(run) => history.record(run).await,
                    Err(e) => error!(branch = %branch, error = %e, "run task failed"),
                }
            }
            debug!(branch = %branch, "run queue drained");
        });

        tx
    }
}
