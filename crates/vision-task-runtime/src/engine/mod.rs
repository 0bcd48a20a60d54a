//! Inference engine contract.
//!
//! An engine turns model bytes into a loaded graph, runs frames through it and releases it. The
//! runtime never looks inside a graph: it only holds the [`EngineHandle`] the engine gave back.
mod arena;
mod passthrough;

pub use arena::{EngineHandle, HandleArena};
pub use passthrough::PassthroughEngine;

use crate::error::EngineError;
use crate::image::Image;
use crate::options::{ImageProcessingOptions, Rect};

/// Parameters for a single engine run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunParams {
    pub region_of_interest: Option<Rect>,
    pub rotation_degrees: i32,
    /// Frame timestamp, only set in video and live stream modes.
    pub timestamp_ms: Option<i64>,
}

impl RunParams {
    pub fn new(options: &ImageProcessingOptions, timestamp_ms: Option<i64>) -> Self {
        Self {
            region_of_interest: options.region_of_interest,
            rotation_degrees: options.rotation_degrees,
            timestamp_ms,
        }
    }
}

/// The inference backend.
///
/// Implementations must tolerate calls on different handles from different threads. Calls on
/// the same handle are never overlapping: the runtime serializes them.
pub trait InferenceEngine: Send + Sync + 'static {
    type Output: Send + 'static;

    fn name(&self) -> &str;

    /// Builds a ready-to-run graph from the model bytes. Must not leave anything allocated when
    /// it fails.
    fn load_model(&self, model: &[u8]) -> Result<EngineHandle, EngineError>;

    fn run(
        &self,
        handle: &EngineHandle,
        image: &Image,
        params: &RunParams,
    ) -> Result<Self::Output, EngineError>;

    fn release(&self, handle: EngineHandle) -> Result<(), EngineError>;
}
