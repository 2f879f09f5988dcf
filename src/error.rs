use thiserror::Error;

use segsched_lib::error::{ManifestError, ProfileError};
use segsched_lib::{ConfigError, EngineError, SchedError};

/// Main error type for the benchmark binary
#[derive(Error, Debug)]
pub enum BenchError {
    #[error(transparent)]
    Sched(#[from] SchedError),

    #[error("Failed to load config file {path}: {reason}")]
    ConfigFile { path: String, reason: String },

    #[error("Invalid log level {0:?}")]
    LogLevel(String),

    #[error("No transcoding engine compiled in; rebuild with `--features ffmpeg`")]
    NoEngine,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for BenchError {
    fn from(err: ConfigError) -> Self {
        BenchError::Sched(err.into())
    }
}

impl From<ManifestError> for BenchError {
    fn from(err: ManifestError) -> Self {
        BenchError::Sched(err.into())
    }
}

impl From<ProfileError> for BenchError {
    fn from(err: ProfileError) -> Self {
        BenchError::Sched(err.into())
    }
}

impl From<EngineError> for BenchError {
    fn from(source: EngineError) -> Self {
        BenchError::Sched(SchedError::EngineSetup {
            role: "engine".into(),
            source,
        })
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, BenchError>;
