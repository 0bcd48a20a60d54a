//! Lifecycle runtime for vision inference tasks.
//!
//! A task is built from [`TaskOptions`], loads its model into an [`InferenceEngine`] once, then
//! processes frames according to its [`RunningMode`]:
//!
//! * [`RunningMode::Image`]: [`VisionTask::process`], one independent image per call.
//! * [`RunningMode::Video`]: [`VisionTask::process_video`], frames with strictly increasing
//!   timestamps.
//! * [`RunningMode::LiveStream`]: [`VisionTask::process_async`], frames queued to a delivery
//!   thread, results handed to the [`ResultCallback`] in submission order.
//!
//! The model is released by [`VisionTask::close`], at the end of [`VisionTask::scope`] or on
//! drop, whichever comes first.

pub mod acquire;
mod dispatch;
pub mod engine;
pub mod error;
pub mod image;
pub mod logging;
pub mod options;
mod task;
mod type_name;

pub use acquire::ModelHandle;
pub use dispatch::FrameOutcome;
pub use engine::{EngineHandle, InferenceEngine, PassthroughEngine, RunParams};
pub use error::{
    ConfigurationError, EngineError, ResourceError, SequencingError, StateError, TaskError,
    TaskResult,
};
pub use crate::image::{Image, ImageError, ImageFormat};
pub use options::{
    BaseOptions, ImageProcessingOptions, LiveStreamResult, ModelSource, Rect, ResultCallback,
    RunningMode, TaskConfig, TaskOptions, TaskOptionsBuilder,
};
pub use task::{TaskStrategy, VisionTask};
pub use type_name::base_type_name;
