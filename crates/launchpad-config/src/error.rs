//! Manifest parsing errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("KDL parse error: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("duplicate definition: {0}")]
    Duplicate(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("cycle detected in dependencies: {0}")]
    CycleDetected(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<launchpad_core::Error> for ConfigError {
    fn from(err: launchpad_core::Error) -> Self {
        use launchpad_core::Error;
        match err {
            Error::DuplicateResource(key) => ConfigError::Duplicate(format!("resource {key}")),
            Error::CyclicDependency { .. } => ConfigError::CycleDetected(err.to_string()),
            Error::UnknownDependency { .. } | Error::NotFound(_) => {
                ConfigError::InvalidReference(err.to_string())
            }
            other => ConfigError::InvalidValue {
                field: "resource".to_string(),
                message: other.to_string(),
            },
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
