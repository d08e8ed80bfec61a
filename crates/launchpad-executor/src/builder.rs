//! Image builds and pushes run as jobs on an [`Executor`].

use async_trait::async_trait;
use futures::StreamExt;
use launchpad_core::executor::{Executor, JobOutcome, JobSpec, LogStream, Mount};
use launchpad_core::image::{ImageArtifact, ImageBuilder};
use launchpad_core::secret::{SecretRef, SecretStore};
use launchpad_core::source::SourceSnapshot;
use launchpad_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DOCKER_SOCKET: &str = "/var/run/docker.sock";
const WORKSPACE: &str = "/workspace";
const PASSWORD_ENV: &str = "REGISTRY_PASSWORD";

/// Builds with `docker build` and pushes with `docker push`, both inside a
/// builder container that talks to the host daemon.
pub struct ContainerImageBuilder {
    executor: Arc<dyn Executor>,
    /// Registry repository URI without a tag.
    repository: String,
    builder_image: String,
    registry_username: String,
    password: Option<(Arc<dyn SecretStore>, SecretRef)>,
    timeout: Duration,
}

impl ContainerImageBuilder {
    pub fn new(
        executor: Arc<dyn Executor>,
        repository: impl Into<String>,
        builder_image: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            repository: repository.into(),
            builder_image: builder_image.into(),
            registry_username: "AWS".to_string(),
            password: None,
            timeout: Duration::from_secs(30 * 60),
        }
    }

    /// Log in to the registry before pushing.
    pub fn with_registry_login(
        mut self,
        username: impl Into<String>,
        store: Arc<dyn SecretStore>,
        password: SecretRef,
    ) -> Self {
        self.registry_username = username.into();
        self.password = Some((store, password));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn socket_mount() -> Mount {
        Mount::read_write(DOCKER_SOCKET, DOCKER_SOCKET)
    }

    /// Spawn `spec`, forward its output to the log, and fail unless it exits 0.
    async fn run(&self, step: &'static str, spec: JobSpec) -> Result<()> {
        let handle = self.executor.spawn(spec).await?;
        let job_id = handle.id;

        let outcome = tokio::time::timeout(self.timeout, async {
            let mut logs = self.executor.logs(&handle).await?;
            while let Some(line) = logs.next().await {
                match line.stream {
                    LogStream::Stderr => debug!(step, job_id = %job_id, stderr = %line.content),
                    _ => debug!(step, job_id = %job_id, stdout = %line.content),
                }
            }
            self.executor.wait(&handle).await
        })
        .await;

        if let Err(e) = self.executor.remove(&handle).await {
            warn!(step, job_id = %job_id, error = %e, "failed to clean up job");
        }

        let outcome = match outcome {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(Error::ExecutionFailed(format!(
                    "{step} timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        match outcome {
            JobOutcome::Succeeded => Ok(()),
            JobOutcome::Failed { message, .. } => {
                Err(Error::ExecutionFailed(format!("{step} failed: {message}")))
            }
        }
    }
}

/// Quote a value for `/bin/sh`.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Host part of a repository URI, used for `docker login`.
fn registry_host(repository: &str) -> &str {
    repository.split('/').next().unwrap_or(repository)
}

fn build_script(image: &ImageArtifact) -> String {
    format!("docker build --pull -t {} .", shell_quote(&image.uri()))
}

fn push_script(image: &ImageArtifact, tags: &[String], login_as: Option<&str>) -> String {
    let mut steps = Vec::new();
    if let Some(username) = login_as {
        steps.push(format!(
            "printf '%s' \"${PASSWORD_ENV}\" | docker login --username {} --password-stdin {}",
            shell_quote(username),
            shell_quote(registry_host(&image.repository))
        ));
    }
    for tag in tags.iter().filter(|tag| **tag != image.tag) {
        steps.push(format!(
            "docker tag {} {}",
            shell_quote(&image.uri()),
            shell_quote(&image.uri_for(tag))
        ));
    }
    for tag in tags {
        steps.push(format!("docker push {}", shell_quote(&image.uri_for(tag))));
    }
    steps.join(" && ")
}

#[async_trait]
impl ImageBuilder for ContainerImageBuilder {
    fn name(&self) -> &'static str {
        "container"
    }

    async fn build(&self, source: &SourceSnapshot, tag: &str) -> Result<ImageArtifact> {
        let image = ImageArtifact {
            repository: self.repository.clone(),
            tag: tag.to_string(),
        };

        let spec = JobSpec::shell(&self.builder_image, build_script(&image))
            .in_dir(WORKSPACE)
            .with_mount(Self::socket_mount())
            .with_mount(Mount::read_only(&source.path, WORKSPACE));

        info!(image = %image.uri(), source = %source.path.display(), "building image");
        self.run("build", spec).await?;
        Ok(image)
    }

    async fn push(&self, image: &ImageArtifact, tags: &[String]) -> Result<()> {
        let password = match &self.password {
            Some((store, secret)) => {
                let value = store.get(secret).await?;
                let password = value.as_string().ok_or_else(|| {
                    Error::InvalidInput(format!("secret {secret} holds no password"))
                })?;
                Some(password.to_string())
            }
            None => None,
        };
        let login_as = password.as_ref().map(|_| self.registry_username.as_str());

        let mut spec = JobSpec::shell(&self.builder_image, push_script(image, tags, login_as))
            .with_mount(Self::socket_mount());
        if let Some(password) = password {
            spec = spec.with_env(PASSWORD_ENV, password);
        }

        info!(repository = %image.repository, tags = ?tags, "pushing image");
        self.run("push", spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::stream::{self, BoxStream};
    use launchpad_core::executor::{JobHandle, LogLine};
    use launchpad_state::StaticSecretStore;
    use std::path::PathBuf;
    use tokio::sync::Mutex;

    /// Records spawned jobs and finishes them with a fixed exit code.
    struct FakeExecutor {
        exit_code: i64,
        spawned: Mutex<Vec<JobSpec>>,
        removed: Mutex<usize>,
    }

    impl FakeExecutor {
        fn new(exit_code: i64) -> Arc<Self> {
            Arc::new(Self {
                exit_code,
                spawned: Mutex::new(Vec::new()),
                removed: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn spawn(&self, spec: JobSpec) -> Result<JobHandle> {
            let id = spec.id;
            self.spawned.lock().await.push(spec);
            Ok(JobHandle {
                id,
                container_id: "fake-1".to_string(),
            })
        }

        async fn logs(&self, _handle: &JobHandle) -> Result<BoxStream<'static, LogLine>> {
            Ok(Box::pin(stream::iter(vec![LogLine {
                stream: LogStream::Stdout,
                content: "Step 1/4".to_string(),
            }])))
        }

        async fn wait(&self, _handle: &JobHandle) -> Result<JobOutcome> {
            Ok(if self.exit_code == 0 {
                JobOutcome::Succeeded
            } else {
                JobOutcome::Failed {
                    exit_code: Some(self.exit_code),
                    message: format!("exit code {}", self.exit_code),
                }
            })
        }

        async fn remove(&self, _handle: &JobHandle) -> Result<()> {
            *self.removed.lock().await += 1;
            Ok(())
        }
    }

    const REPO: &str = "123.dkr.ecr.us-east-1.amazonaws.com/storefront";

    fn source() -> SourceSnapshot {
        SourceSnapshot {
            revision: Some("abcdef1234567".to_string()),
            path: PathBuf::from("/tmp/src-1"),
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn build_runs_docker_build_on_the_source() {
        let executor = FakeExecutor::new(0);
        let builder = ContainerImageBuilder::new(executor.clone(), REPO, "docker:27-cli");

        let image = builder.build(&source(), "abcdef1").await.unwrap();
        assert_eq!(image.uri(), format!("{REPO}:abcdef1"));

        let spawned = executor.spawned.lock().await;
        let spec = &spawned[0];
        assert_eq!(spec.image, "docker:27-cli");
        assert_eq!(spec.working_dir.as_deref(), Some(WORKSPACE));
        let script = spec.script().unwrap();
        assert!(script.starts_with("docker build"));
        assert!(script.contains(&format!("'{REPO}:abcdef1'")));
        assert!(spec.mounts.contains(&Mount::read_only("/tmp/src-1", WORKSPACE)));
        assert_eq!(*executor.removed.lock().await, 1);
    }

    #[tokio::test]
    async fn failed_build_is_an_error() {
        let executor = FakeExecutor::new(1);
        let builder = ContainerImageBuilder::new(executor.clone(), REPO, "docker:27-cli");

        let err = builder.build(&source(), "abcdef1").await.unwrap_err();
        assert!(err.to_string().contains("build failed"));
        assert_eq!(*executor.removed.lock().await, 1);
    }

    #[tokio::test]
    async fn push_tags_and_pushes_every_tag_after_login() {
        let executor = FakeExecutor::new(0);
        let secrets = Arc::new(StaticSecretStore::new().with_secret("registry-password", "hunter2"));
        let builder = ContainerImageBuilder::new(executor.clone(), REPO, "docker:27-cli")
            .with_registry_login("AWS", secrets, SecretRef::new("registry-password"));

        let image = ImageArtifact {
            repository: REPO.to_string(),
            tag: "abcdef1".to_string(),
        };
        builder
            .push(&image, &["latest".to_string(), "abcdef1".to_string()])
            .await
            .unwrap();

        let spawned = executor.spawned.lock().await;
        let script = spawned[0].script().unwrap();
        assert!(script.starts_with("printf '%s' \"$REGISTRY_PASSWORD\" | docker login"));
        assert!(script.contains("'123.dkr.ecr.us-east-1.amazonaws.com'"));
        assert!(script.contains(&format!("docker tag '{REPO}:abcdef1' '{REPO}:latest'")));
        assert!(script.contains(&format!("docker push '{REPO}:latest'")));
        assert!(script.contains(&format!("docker push '{REPO}:abcdef1'")));
        assert!(!script.contains("hunter2"));
        assert_eq!(spawned[0].env[PASSWORD_ENV], "hunter2");
    }

    #[test]
    fn quoting_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
