//! Turns validated options into a loaded model graph.

use crate::engine::{EngineHandle, InferenceEngine, RunParams};
use crate::error::{EngineError, ResourceError};
use crate::image::Image;
use crate::options::{ModelSource, TaskOptions};
use std::borrow::Cow;
use std::sync::Arc;

/// A loaded model graph owned by exactly one task.
///
/// The graph is released exactly once: either explicitly through [`ModelHandle::release`], or
/// when the handle is dropped.
pub struct ModelHandle<E: InferenceEngine> {
    engine: Arc<E>,
    handle: Option<EngineHandle>,
}

impl<E: InferenceEngine> ModelHandle<E> {
    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn run(&self, image: &Image, params: &RunParams) -> Result<E::Output, EngineError> {
        match &self.handle {
            Some(handle) => self.engine.run(handle, image, params),
            None => Err(EngineError::Run(anyhow::anyhow!(
                "Model graph has already been released"
            ))),
        }
    }

    pub fn release(mut self) -> Result<(), EngineError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), EngineError> {
        match self.handle.take() {
            Some(handle) => {
                log::debug!("Releasing model graph {handle} on engine '{}'", self.engine.name());
                self.engine.release(handle)
            }
            None => Ok(()),
        }
    }
}

impl<E: InferenceEngine> Drop for ModelHandle<E> {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            log::warn!("Failed to release model graph: {e}");
        }
    }
}

/// Reads the model bytes. Buffers are borrowed, paths are read from disk.
pub fn read_model(source: &ModelSource) -> Result<Cow<'_, [u8]>, ResourceError> {
    match source {
        ModelSource::Buffer(bytes) => Ok(Cow::Borrowed(&bytes[..])),
        ModelSource::Path(path) => std::fs::read(path)
            .map(Cow::Owned)
            .map_err(|source| ResourceError::ModelNotFound {
                path: path.clone(),
                source,
            }),
    }
}

/// Loads the model described by `options` into `engine`.
///
/// Either a fully initialized handle is returned or nothing is left allocated in the engine.
pub fn acquire<E: InferenceEngine, R>(
    engine: &Arc<E>,
    options: &TaskOptions<R>,
) -> Result<ModelHandle<E>, ResourceError> {
    let source = options.model_source();
    let model = read_model(source)?;
    log::debug!(
        "Loading model {source:?} ({} bytes) on engine '{}'",
        model.len(),
        engine.name()
    );

    let handle = engine
        .load_model(&model)
        .map_err(ResourceError::InvalidModel)?;
    log::info!("Loaded model graph {handle} on engine '{}'", engine.name());

    Ok(ModelHandle {
        engine: engine.clone(),
        handle: Some(handle),
    })
}
