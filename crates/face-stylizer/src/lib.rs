//! Face stylization.
//!
//! [`FaceStylizer`] runs a face stylizer model over images, video frames or a live stream and
//! returns the stylized image. With the placeholder stylizer model the output is the input
//! image, unchanged.

use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use vision_task_runtime::{
    BaseOptions, ConfigurationError, EngineError, Image, ImageProcessingOptions, InferenceEngine,
    LiveStreamResult, ModelHandle, PassthroughEngine, ResultCallback, RunParams, RunningMode,
    TaskConfig, TaskOptions, TaskResult, TaskStrategy, VisionTask,
};

/// Runs the stylizer graph on one frame.
pub struct StylizeStrategy<E> {
    _engine: PhantomData<fn() -> E>,
}

impl<E> Default for StylizeStrategy<E> {
    fn default() -> Self {
        Self {
            _engine: PhantomData,
        }
    }
}

impl<E: InferenceEngine<Output = Image>> TaskStrategy for StylizeStrategy<E> {
    type Engine = E;
    type Result = Image;

    fn name(&self) -> String {
        "face_stylizer".to_string()
    }

    fn invoke(
        &self,
        model: &ModelHandle<E>,
        image: &Image,
        params: &RunParams,
    ) -> Result<Image, EngineError> {
        model.run(image, params)
    }
}

/// Options for [`FaceStylizer`].
///
/// `result_callback` must be set in [`RunningMode::LiveStream`] and only there.
#[derive(Clone, Debug, Default)]
pub struct FaceStylizerOptions {
    pub base_options: BaseOptions,
    pub running_mode: RunningMode,
    pub result_callback: Option<ResultCallback<Image>>,
}

impl FaceStylizerOptions {
    pub fn new(base_options: BaseOptions) -> Self {
        Self {
            base_options,
            ..Default::default()
        }
    }

    pub fn with_running_mode(mut self, running_mode: RunningMode) -> Self {
        self.running_mode = running_mode;
        self
    }

    pub fn with_result_callback(
        mut self,
        callback: impl Fn(LiveStreamResult<Image>) + Send + Sync + 'static,
    ) -> Self {
        self.result_callback = Some(ResultCallback::new(callback));
        self
    }

    pub fn into_task_options(self) -> Result<TaskOptions<Image>, ConfigurationError> {
        TaskOptions::new(
            self.base_options,
            Some(self.running_mode),
            self.result_callback,
        )
    }
}

impl From<TaskConfig> for FaceStylizerOptions {
    fn from(config: TaskConfig) -> Self {
        Self {
            base_options: config.base_options,
            running_mode: config.running_mode.unwrap_or_default(),
            result_callback: None,
        }
    }
}

/// Face stylizer task.
///
/// Closed on [`FaceStylizer::close`], at the end of [`FaceStylizer::scope`] or on drop.
pub struct FaceStylizer<E: InferenceEngine<Output = Image> = PassthroughEngine> {
    task: VisionTask<StylizeStrategy<E>>,
}

impl<E: InferenceEngine<Output = Image>> Debug for FaceStylizer<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FaceStylizer").field(&self.task).finish()
    }
}

impl FaceStylizer {
    /// Creates an image mode stylizer from a model file.
    pub fn create_from_model_path(path: impl Into<PathBuf>) -> TaskResult<Self> {
        Self::create_from_model_path_with_engine(Arc::new(PassthroughEngine::new()), path)
    }

    pub fn create_from_options(options: FaceStylizerOptions) -> TaskResult<Self> {
        Self::create_from_options_with_engine(Arc::new(PassthroughEngine::new()), options)
    }
}

impl<E: InferenceEngine<Output = Image>> FaceStylizer<E> {
    pub fn create_from_model_path_with_engine(
        engine: Arc<E>,
        path: impl Into<PathBuf>,
    ) -> TaskResult<Self> {
        let task = VisionTask::create_from_model_path(engine, StylizeStrategy::default(), path)?;
        Ok(Self { task })
    }

    pub fn create_from_options_with_engine(
        engine: Arc<E>,
        options: FaceStylizerOptions,
    ) -> TaskResult<Self> {
        let options = options.into_task_options()?;
        let task = VisionTask::create_from_options(engine, StylizeStrategy::default(), options)?;
        Ok(Self { task })
    }

    /// Stylizes a single image. Image mode only.
    ///
    /// The region of interest, when given, selects the face to stylize. Rotation is applied
    /// before the model sees the image.
    pub fn stylize(
        &self,
        image: &Image,
        image_processing_options: Option<&ImageProcessingOptions>,
    ) -> TaskResult<Image> {
        self.task.process(image, image_processing_options)
    }

    /// Same as [`FaceStylizer::stylize`].
    pub fn detect(
        &self,
        image: &Image,
        image_processing_options: Option<&ImageProcessingOptions>,
    ) -> TaskResult<Image> {
        self.stylize(image, image_processing_options)
    }

    /// Stylizes one video frame. Video mode only, timestamps must strictly increase.
    pub fn stylize_for_video(
        &self,
        image: &Image,
        timestamp_ms: i64,
        image_processing_options: Option<&ImageProcessingOptions>,
    ) -> TaskResult<Image> {
        self.task
            .process_video(image, image_processing_options, timestamp_ms)
    }

    /// Queues a live frame. Live stream mode only; the stylized image goes to the result
    /// callback.
    pub fn stylize_async(
        &self,
        image: &Image,
        timestamp_ms: i64,
        image_processing_options: Option<&ImageProcessingOptions>,
    ) -> TaskResult<()> {
        log::trace!("Submitting frame at {timestamp_ms} ms for stylization");
        self.task
            .process_async(image, image_processing_options, timestamp_ms)
    }

    pub fn running_mode(&self) -> RunningMode {
        self.task.running_mode()
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_closed()
    }

    pub fn close(&self) {
        self.task.close();
    }

    /// Runs `f` with the stylizer, then closes it.
    pub fn scope<T>(self, f: impl FnOnce(&Self) -> T) -> T {
        let output = f(&self);
        self.close();
        output
    }
}
