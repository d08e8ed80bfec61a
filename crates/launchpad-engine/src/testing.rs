//! Fakes shared by the engine tests.

use async_trait::async_trait;
use chrono::Utc;
use launchpad_core::image::{ImageArtifact, ImageBuilder, ImageDefinition};
use launchpad_core::service::{ServiceController, ServiceHealth};
use launchpad_core::source::{SourceFetcher, SourceSnapshot};
use launchpad_core::{Error, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use crate::orchestrator::{DeployTarget, PipelineOrchestrator};
use crate::rollout::{RolloutController, RolloutPolicy};

/// Creates a fresh empty checkout per fetch, resolving the trigger revision
/// when given.
pub(crate) struct FakeFetcher {
    revision: Option<String>,
    dir: TempDir,
    delay: Duration,
    active: AtomicU32,
    pub(crate) max_active: AtomicU32,
    pub(crate) fetches: AtomicU32,
    checkouts: Mutex<Vec<PathBuf>>,
}

impl FakeFetcher {
    pub(crate) fn new(revision: Option<&str>) -> Arc<Self> {
        Self::with_delay(revision, Duration::ZERO)
    }

    pub(crate) fn with_delay(revision: Option<&str>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            revision: revision.map(String::from),
            dir: TempDir::new().unwrap(),
            delay,
            active: AtomicU32::new(0),
            max_active: AtomicU32::new(0),
            fetches: AtomicU32::new(0),
            checkouts: Mutex::new(Vec::new()),
        })
    }

    /// Every checkout handed out so far.
    pub(crate) fn checkouts(&self) -> Vec<PathBuf> {
        self.checkouts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn fetch(&self, _branch: &str, revision: Option<&str>) -> Result<SourceSnapshot> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        let n = self.fetches.fetch_add(1, Ordering::SeqCst);

        let path = self.dir.path().join(format!("src-{n}"));
        std::fs::create_dir_all(&path).unwrap();
        self.checkouts.lock().unwrap().push(path.clone());

        Ok(SourceSnapshot {
            revision: revision.map(String::from).or_else(|| self.revision.clone()),
            path,
            fetched_at: Utc::now(),
        })
    }
}

/// Records builds and pushes; optionally fails every build.
#[derive(Default)]
pub(crate) struct FakeBuilder {
    fail_build: bool,
    builds: Mutex<Vec<String>>,
    pushes: Mutex<Vec<Vec<String>>>,
}

impl FakeBuilder {
    pub(crate) fn new(fail_build: bool) -> Arc<Self> {
        Arc::new(Self {
            fail_build,
            ..Default::default()
        })
    }

    pub(crate) fn builds(&self) -> Vec<String> {
        self.builds.lock().unwrap().clone()
    }

    pub(crate) fn pushes(&self) -> Vec<Vec<String>> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageBuilder for FakeBuilder {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn build(&self, _source: &SourceSnapshot, tag: &str) -> Result<ImageArtifact> {
        if self.fail_build {
            return Err(Error::ExecutionFailed("docker build failed: exit code 1".into()));
        }
        self.builds.lock().unwrap().push(tag.to_string());
        Ok(ImageArtifact {
            repository: "registry.local/storefront".to_string(),
            tag: tag.to_string(),
        })
    }

    async fn push(&self, _image: &ImageArtifact, tags: &[String]) -> Result<()> {
        self.pushes.lock().unwrap().push(tags.to_vec());
        Ok(())
    }
}

/// Always on revision "1"; healthy only when `steady`.
pub(crate) struct FakeService {
    steady: bool,
}

#[async_trait]
impl ServiceController for FakeService {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn update_image(&self, _service: &str, _images: &[ImageDefinition]) -> Result<String> {
        Ok("1".to_string())
    }

    async fn health(&self, _service: &str) -> Result<ServiceHealth> {
        Ok(ServiceHealth {
            revision: "1".to_string(),
            desired: 1,
            healthy: u32::from(self.steady),
            stale: u32::from(!self.steady),
        })
    }
}

pub(crate) fn orchestrator(
    fetcher: Arc<FakeFetcher>,
    builder: Arc<FakeBuilder>,
    steady: bool,
) -> PipelineOrchestrator {
    let rollout = RolloutController::new(Arc::new(FakeService { steady })).with_policy(
        RolloutPolicy {
            max_attempts: 3,
            interval: Duration::from_secs(1),
        },
    );
    PipelineOrchestrator::new(
        fetcher,
        builder,
        rollout,
        DeployTarget {
            service: "storefront".to_string(),
            container: "web".to_string(),
        },
    )
}
