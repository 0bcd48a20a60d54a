use super::{EngineHandle, HandleArena, InferenceEngine, RunParams};
use crate::error::EngineError;
use crate::image::Image;
use anyhow::anyhow;
use std::sync::{Mutex, PoisonError};

/// FlatBuffers file identifier of TFLite models, stored right after the root table offset.
const TFLITE_IDENTIFIER: &[u8; 4] = b"TFL3";
const IDENTIFIER_RANGE: std::ops::Range<usize> = 4..8;

struct LoadedGraph {
    model_size: usize,
}

/// Engine for placeholder models.
///
/// It checks that the buffer is a TFLite flatbuffer, then treats the graph as the identity:
/// `run` applies the requested region of interest and rotation and returns the frame as is.
#[derive(Default)]
pub struct PassthroughEngine {
    graphs: Mutex<HandleArena<LoadedGraph>>,
}

impl PassthroughEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smallest buffer this engine accepts as a model.
    pub fn placeholder_model() -> Vec<u8> {
        let mut model = vec![0u8; 16];
        model[0] = 0x10;
        model[IDENTIFIER_RANGE].copy_from_slice(TFLITE_IDENTIFIER);
        model
    }

    /// Number of graphs currently loaded.
    pub fn loaded_graphs(&self) -> usize {
        self.graphs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl InferenceEngine for PassthroughEngine {
    type Output = Image;

    fn name(&self) -> &str {
        "passthrough"
    }

    fn load_model(&self, model: &[u8]) -> Result<EngineHandle, EngineError> {
        match model.get(IDENTIFIER_RANGE) {
            Some(identifier) if identifier == TFLITE_IDENTIFIER => {}
            _ => {
                return Err(EngineError::Load(anyhow!(
                    "The model is not a valid Flatbuffer buffer: missing `{}` file identifier",
                    String::from_utf8_lossy(TFLITE_IDENTIFIER)
                )));
            }
        }

        let handle = self
            .graphs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(LoadedGraph {
                model_size: model.len(),
            });
        log::debug!("Loaded passthrough graph {handle} ({} bytes)", model.len());
        Ok(handle)
    }

    fn run(
        &self,
        handle: &EngineHandle,
        image: &Image,
        params: &RunParams,
    ) -> Result<Image, EngineError> {
        {
            let graphs = self.graphs.lock().unwrap_or_else(PoisonError::into_inner);
            let graph = graphs
                .get(handle)
                .ok_or_else(|| EngineError::Run(anyhow!("Unknown graph handle {handle}")))?;
            log::trace!(
                "Running passthrough graph {handle} ({} bytes) on {image:?}",
                graph.model_size
            );
        }

        let output = match &params.region_of_interest {
            Some(region) => image.crop(region),
            None => image.clone(),
        };
        Ok(output.rotate(params.rotation_degrees))
    }

    fn release(&self, handle: EngineHandle) -> Result<(), EngineError> {
        let display = handle.to_string();
        let removed = self
            .graphs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(handle);
        match removed {
            Some(_) => {
                log::debug!("Released passthrough graph {display}");
                Ok(())
            }
            None => Err(EngineError::Release(anyhow!(
                "Unknown graph handle {display}"
            ))),
        }
    }
}
