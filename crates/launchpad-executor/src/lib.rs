//! Container jobs, source fetching and image builds for Launchpad.
//!
//! - [`DockerExecutor`]: runs jobs in local Docker containers
//! - [`GitSourceFetcher`]: clones the watched repository per run
//! - [`ContainerImageBuilder`]: builds and pushes images through an executor

pub mod builder;
pub mod docker;
pub mod git;

pub use builder::ContainerImageBuilder;
pub use docker::DockerExecutor;
pub use git::GitSourceFetcher;
pub use launchpad_core::executor::{
    Executor, JobHandle, JobOutcome, JobSpec, LogLine, LogStream, Mount,
};
