//! Local Docker executor.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerState, HostConfig};
use futures::StreamExt;
use futures::stream::BoxStream;
use launchpad_core::executor::{
    Executor, JobHandle, JobOutcome, JobSpec, LogLine, LogStream,
};
use launchpad_core::{Error, Result, Uid};
use tracing::{debug, info, warn};

/// Runs jobs as containers on the local Docker daemon.
pub struct DockerExecutor {
    docker: Docker,
}

impl DockerExecutor {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::ExecutionFailed(format!("cannot connect to Docker: {e}")))?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    pub async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    fn container_name(job_id: &Uid) -> String {
        format!("launchpad-job-{}", job_id)
    }

    fn binds(spec: &JobSpec) -> Option<Vec<String>> {
        (!spec.mounts.is_empty()).then(|| spec.mounts.iter().map(|m| m.bind_spec()).collect())
    }

    /// Pull `image`, tolerating failures: the builder image may only exist
    /// locally.
    async fn pull(&self, image: &str) {
        debug!(image = %image, "pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(result) = progress.next().await {
            if let Err(e) = result {
                warn!(image = %image, error = %e, "pull failed; using local image");
                break;
            }
        }
    }

    async fn state(&self, container: &str) -> Result<ContainerState> {
        let inspect = self
            .docker
            .inspect_container(container, None)
            .await
            .map_err(|e| Error::NotFound(format!("container {}: {}", container, e)))?;
        inspect
            .state
            .ok_or_else(|| Error::Internal(format!("container {} has no state", container)))
    }
}

/// Outcome of an exited container; `None` while it has not exited.
fn outcome(state: &ContainerState) -> Option<JobOutcome> {
    if state.running.unwrap_or(false)
        || state.paused.unwrap_or(false)
        || state.restarting.unwrap_or(false)
    {
        return None;
    }

    match state.exit_code {
        Some(0) => Some(JobOutcome::Succeeded),
        exit_code => {
            let message = state
                .error
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| format!("exit code {}", exit_code.unwrap_or(-1)));
            Some(JobOutcome::Failed { exit_code, message })
        }
    }
}

fn log_line(output: LogOutput) -> LogLine {
    let (stream, message) = match output {
        LogOutput::StdErr { message } => (LogStream::Stderr, message),
        LogOutput::StdOut { message }
        | LogOutput::Console { message }
        | LogOutput::StdIn { message } => (LogStream::Stdout, message),
    };
    LogLine {
        stream,
        content: String::from_utf8_lossy(&message).trim_end().to_string(),
    }
}

#[async_trait]
impl Executor for DockerExecutor {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn spawn(&self, spec: JobSpec) -> Result<JobHandle> {
        let name = Self::container_name(&spec.id);
        self.pull(&spec.image).await;

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
            env: Some(env),
            working_dir: spec.working_dir.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(HostConfig {
                binds: Self::binds(&spec),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        info!(container = %name, image = %spec.image, "starting job");
        let container = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("failed to create container: {}", e)))?;
        self.docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("failed to start container: {}", e)))?;

        Ok(JobHandle {
            id: spec.id,
            container_id: container.id,
        })
    }

    async fn logs(&self, handle: &JobHandle) -> Result<BoxStream<'static, LogLine>> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let lines = self
            .docker
            .logs(&Self::container_name(&handle.id), Some(options))
            .filter_map(|result| async move {
                match result {
                    Ok(output) => Some(log_line(output)),
                    Err(e) => {
                        warn!(error = %e, "log stream error");
                        None
                    }
                }
            });
        Ok(Box::pin(lines))
    }

    async fn wait(&self, handle: &JobHandle) -> Result<JobOutcome> {
        let name = Self::container_name(&handle.id);
        if let Some(done) = outcome(&self.state(&name).await?) {
            return Ok(done);
        }

        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut exits = self.docker.wait_container(&name, Some(options));
        // Non-zero exits surface as errors here; the inspected state has the code.
        if let Some(Err(e)) = exits.next().await {
            debug!(container = %name, error = %e, "wait returned error");
        }

        outcome(&self.state(&name).await?)
            .ok_or_else(|| Error::ExecutionFailed(format!("container {} did not exit", name)))
    }

    async fn remove(&self, handle: &JobHandle) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(&Self::container_name(&handle.id), Some(options))
            .await
            .map_err(|e| Error::ExecutionFailed(format!("failed to remove container: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_core::executor::Mount;

    #[test]
    fn test_container_name_is_deterministic_per_job() {
        let id = Uid::new();
        let name = DockerExecutor::container_name(&id);
        assert!(name.starts_with("launchpad-job-"));
        assert_eq!(name, DockerExecutor::container_name(&id));
        assert_ne!(name, DockerExecutor::container_name(&Uid::new()));
    }

    #[test]
    fn test_binds_follow_mounts() {
        let spec = JobSpec::shell("docker:27-cli", "docker version");
        assert!(DockerExecutor::binds(&spec).is_none());

        let spec = spec
            .with_mount(Mount::read_write("/var/run/docker.sock", "/var/run/docker.sock"))
            .with_mount(Mount::read_only("/tmp/src", "/workspace"));
        assert_eq!(
            DockerExecutor::binds(&spec).unwrap(),
            vec![
                "/var/run/docker.sock:/var/run/docker.sock:rw",
                "/tmp/src:/workspace:ro"
            ]
        );
    }

    #[test]
    fn test_exited_container_outcome() {
        let succeeded = ContainerState {
            running: Some(false),
            exit_code: Some(0),
            ..Default::default()
        };
        assert_eq!(outcome(&succeeded), Some(JobOutcome::Succeeded));

        let failed = ContainerState {
            running: Some(false),
            exit_code: Some(2),
            ..Default::default()
        };
        assert_eq!(
            outcome(&failed),
            Some(JobOutcome::Failed {
                exit_code: Some(2),
                message: "exit code 2".to_string(),
            })
        );
    }

    #[test]
    fn test_running_container_has_no_outcome() {
        let running = ContainerState {
            running: Some(true),
            ..Default::default()
        };
        assert_eq!(outcome(&running), None);
    }

    #[test]
    fn test_stderr_is_kept_apart() {
        let line = log_line(LogOutput::StdErr {
            message: "denied: requested access\n".into(),
        });
        assert_eq!(line.stream, LogStream::Stderr);
        assert_eq!(line.content, "denied: requested access");
    }
}

/// Integration tests that require Docker to be running.
/// Run with: cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    #[ignore]
    async fn test_job_lifecycle() {
        let executor = DockerExecutor::new().unwrap();
        let spec = JobSpec::shell("alpine:latest", "echo \"hello $GREETING\"")
            .with_env("GREETING", "launchpad");

        let handle = executor.spawn(spec).await.expect("Should spawn container");
        let outcome = executor.wait(&handle).await.expect("Should wait for container");
        assert!(outcome.is_success());

        let mut logs = executor.logs(&handle).await.expect("Should get logs");
        let mut found = false;
        while let Some(line) = logs.next().await {
            found |= line.content.contains("hello launchpad");
        }
        assert!(found, "Should find greeting in output");

        executor.remove(&handle).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_failing_job() {
        let executor = DockerExecutor::new().unwrap();
        let handle = executor
            .spawn(JobSpec::shell("alpine:latest", "exit 42"))
            .await
            .expect("Should spawn container");

        let outcome = executor.wait(&handle).await.expect("Should wait for container");
        assert!(matches!(
            outcome,
            JobOutcome::Failed {
                exit_code: Some(42),
                ..
            }
        ));

        executor.remove(&handle).await.unwrap();
    }
}
