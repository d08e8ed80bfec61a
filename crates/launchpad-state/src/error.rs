//! State store error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid environment name: {0:?}")]
    InvalidEnvironment(String),

    #[error("stale snapshot for {environment}: saved serial is {current}, snapshot has {given}")]
    SerialConflict {
        environment: String,
        current: u64,
        given: u64,
    },
}

impl From<StateError> for launchpad_core::Error {
    fn from(err: StateError) -> Self {
        launchpad_core::Error::Storage(err.to_string())
    }
}

pub type StateResult<T> = std::result::Result<T, StateError>;

/// Environment names become file names; reject anything that could escape
/// the state directory.
pub(crate) fn check_environment(environment: &str) -> StateResult<()> {
    let valid = !environment.is_empty()
        && !environment.starts_with('.')
        && environment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StateError::InvalidEnvironment(environment.to_string()))
    }
}
