use crate::options::{Rect, RunningMode};
use std::path::PathBuf;

pub type TaskResult<T> = Result<T, TaskError>;

/// Top level error returned by every fallible task operation.
#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Sequencing(#[from] SequencingError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Invalid or contradictory options, or a call whose shape does not match the running mode.
#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("Only one of model_asset_path or model_asset_buffer can be set, found both")]
    ConflictingModelSource,
    #[error("A model source must be set through model_asset_path or model_asset_buffer")]
    MissingModelSource,
    #[error("The model asset {0} is empty")]
    EmptyModelSource(&'static str),
    #[error(
        "The vision task is in live stream mode, a user-defined result callback must be provided"
    )]
    MissingResultCallback,
    #[error(
        "The vision task is in {0} mode, a user-defined result callback should not be provided"
    )]
    UnexpectedResultCallback(RunningMode),
    #[error("Task is not initialized with the {expected} mode. Current running mode: {current}")]
    RunningModeMismatch {
        expected: RunningMode,
        current: RunningMode,
    },
    #[error("A frame timestamp is required in {0} mode")]
    MissingTimestamp(RunningMode),
    #[error("Frame timestamps are not accepted in image mode")]
    UnexpectedTimestamp,
    #[error("Expected rotation to be a multiple of 90°, got {0}")]
    InvalidRotation(i32),
    #[error(
        "Expected a normalized region of interest with left < right and top < bottom, got {0:?}"
    )]
    InvalidRegionOfInterest(Rect),
    #[error("Failed to parse TOML task configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Failed to parse JSON task configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures while turning a model source into a live engine handle.
#[derive(thiserror::Error, Debug)]
pub enum ResourceError {
    #[error("Unable to open file at {}: {source}", path.display())]
    ModelNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid model: {0}")]
    InvalidModel(#[source] EngineError),
    #[error("Failed to start the live stream worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error(
    "Input timestamp must be monotonically increasing: got {timestamp_ms} ms after {last_timestamp_ms} ms"
)]
pub struct SequencingError {
    pub timestamp_ms: i64,
    pub last_timestamp_ms: i64,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    #[error("The task has already been closed")]
    Closed,
}

/// Opaque engine failure. The engine's diagnostic text is kept as is.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Model loading failed: {0}")]
    Load(anyhow::Error),
    #[error("Inference failed: {0}")]
    Run(anyhow::Error),
    #[error("Handle release failed: {0}")]
    Release(anyhow::Error),
}

impl TaskError {
    pub fn is_closed(&self) -> bool {
        matches!(self, TaskError::State(StateError::Closed))
    }
}
