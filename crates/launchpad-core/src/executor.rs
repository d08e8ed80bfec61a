//! Container jobs.
//!
//! Image builds and pushes run as short-lived containers. [`Executor`] is the
//! seam between the image builder and whatever runs those containers.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::{Result, Uid};

/// A container to run once to completion.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: Uid,
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
}

impl JobSpec {
    /// A job running `script` through `/bin/sh -c`.
    pub fn shell(image: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            id: Uid::new(),
            image: image.into(),
            command: vec!["/bin/sh".to_string(), "-c".to_string(), script.into()],
            working_dir: None,
            env: BTreeMap::new(),
            mounts: Vec::new(),
        }
    }

    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Script of a job built with [`JobSpec::shell`].
    pub fn script(&self) -> Option<&str> {
        match self.command.as_slice() {
            [shell, flag, script] if shell == "/bin/sh" && flag == "-c" => Some(script),
            _ => None,
        }
    }
}

/// Host path bound into the job container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    pub fn read_only(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: true,
        }
    }

    pub fn read_write(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            read_only: false,
            ..Self::read_only(host, container)
        }
    }

    /// `host:container:mode`, as Docker expects binds.
    pub fn bind_spec(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{}", self.host.display(), self.container, mode)
    }
}

/// A started job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: Uid,
    /// Executor-specific identifier (e.g., container ID).
    pub container_id: String,
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed {
        exit_code: Option<i64>,
        message: String,
    },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct LogLine {
    pub stream: LogStream,
    pub content: String,
}

#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start the job's container.
    async fn spawn(&self, spec: JobSpec) -> Result<JobHandle>;

    /// Follow the job's output until it exits.
    async fn logs(&self, handle: &JobHandle) -> Result<BoxStream<'static, LogLine>>;

    async fn wait(&self, handle: &JobHandle) -> Result<JobOutcome>;

    /// Remove the job's container, stopping it first if it still runs.
    async fn remove(&self, handle: &JobHandle) -> Result<()>;
}
