//! Task configuration and its validation.
//!
//! Raw configuration ([`BaseOptions`], [`TaskConfig`]) can be written by hand, built through
//! [`TaskOptionsBuilder`] or deserialized from TOML/JSON. [`TaskOptions`] can only be obtained
//! through validation, so holding one means the model source and the running mode / callback
//! pair are consistent. Nothing here touches the filesystem or an engine.

use crate::error::{ConfigurationError, TaskResult};
use crate::image::Image;
use derive_more::Deref;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Declared invocation pattern of a task, fixed at construction.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunningMode {
    /// Single, independent images.
    #[default]
    Image,
    /// Decoded video frames with strictly increasing timestamps.
    Video,
    /// Live frames processed asynchronously, results delivered to a callback.
    LiveStream,
}

impl RunningMode {
    pub fn requires_timestamp(self) -> bool {
        !matches!(self, RunningMode::Image)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum ModelSource {
    Path(PathBuf),
    Buffer(Arc<[u8]>),
}

impl Debug for ModelSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            ModelSource::Buffer(bytes) => write!(f, "Buffer({} bytes)", bytes.len()),
        }
    }
}

/// Where the model comes from. Exactly one of the two fields must be set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseOptions {
    pub model_asset_path: Option<PathBuf>,
    pub model_asset_buffer: Option<Vec<u8>>,
}

impl BaseOptions {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            model_asset_path: Some(path.into()),
            model_asset_buffer: None,
        }
    }

    pub fn from_buffer(buffer: impl Into<Vec<u8>>) -> Self {
        Self {
            model_asset_path: None,
            model_asset_buffer: Some(buffer.into()),
        }
    }

    pub fn model_source(self) -> Result<ModelSource, ConfigurationError> {
        match (self.model_asset_path, self.model_asset_buffer) {
            (Some(_), Some(_)) => Err(ConfigurationError::ConflictingModelSource),
            (None, None) => Err(ConfigurationError::MissingModelSource),
            (Some(path), None) if path.as_os_str().is_empty() => {
                Err(ConfigurationError::EmptyModelSource("path"))
            }
            (None, Some(buffer)) if buffer.is_empty() => {
                Err(ConfigurationError::EmptyModelSource("buffer"))
            }
            (Some(path), None) => Ok(ModelSource::Path(path)),
            (None, Some(buffer)) => Ok(ModelSource::Buffer(buffer.into())),
        }
    }
}

/// Serializable task configuration. The result callback cannot be serialized and is supplied
/// separately to [`TaskOptions::from_config`].
///
/// ```toml
/// running_mode = "video"
///
/// [base_options]
/// model_asset_path = "face_stylizer.tflite"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub base_options: BaseOptions,
    pub running_mode: Option<RunningMode>,
}

impl TaskConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigurationError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_str(content)?)
    }
}

/// What a live stream result callback receives for every submitted frame.
#[derive(Debug)]
pub struct LiveStreamResult<R> {
    pub result: TaskResult<R>,
    /// The frame as it was submitted.
    pub input: Image,
    pub timestamp_ms: i64,
}

/// Callback invoked on the task's delivery thread, once per frame, in submission order.
#[derive(Deref)]
pub struct ResultCallback<R>(Arc<dyn Fn(LiveStreamResult<R>) + Send + Sync>);

impl<R> ResultCallback<R> {
    pub fn new(callback: impl Fn(LiveStreamResult<R>) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    pub(crate) fn deliver(&self, result: LiveStreamResult<R>) {
        let callback: &(dyn Fn(LiveStreamResult<R>) + Send + Sync) = &*self.0;
        callback(result)
    }
}

impl<R> Clone for ResultCallback<R> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<R> Debug for ResultCallback<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResultCallback")
    }
}

/// Validated task options.
pub struct TaskOptions<R> {
    model_source: ModelSource,
    running_mode: RunningMode,
    result_callback: Option<ResultCallback<R>>,
}

impl<R> Clone for TaskOptions<R> {
    fn clone(&self) -> Self {
        Self {
            model_source: self.model_source.clone(),
            running_mode: self.running_mode,
            result_callback: self.result_callback.clone(),
        }
    }
}

impl<R> Debug for TaskOptions<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskOptions")
            .field("model_source", &self.model_source)
            .field("running_mode", &self.running_mode)
            .field("result_callback", &self.result_callback.is_some())
            .finish()
    }
}

impl<R> TaskOptions<R> {
    /// Validates raw options. The running mode defaults to [`RunningMode::Image`].
    pub fn new(
        base_options: BaseOptions,
        running_mode: Option<RunningMode>,
        result_callback: Option<ResultCallback<R>>,
    ) -> Result<Self, ConfigurationError> {
        let model_source = base_options.model_source()?;
        let running_mode = running_mode.unwrap_or_default();

        match (running_mode, &result_callback) {
            (RunningMode::LiveStream, None) => {
                return Err(ConfigurationError::MissingResultCallback);
            }
            (RunningMode::Image | RunningMode::Video, Some(_)) => {
                return Err(ConfigurationError::UnexpectedResultCallback(running_mode));
            }
            _ => {}
        }

        Ok(Self {
            model_source,
            running_mode,
            result_callback,
        })
    }

    /// Image mode options for a model file.
    pub fn from_model_path(path: impl Into<PathBuf>) -> Result<Self, ConfigurationError> {
        Self::new(BaseOptions::from_path(path), None, None)
    }

    pub fn from_config(
        config: TaskConfig,
        result_callback: Option<ResultCallback<R>>,
    ) -> Result<Self, ConfigurationError> {
        Self::new(config.base_options, config.running_mode, result_callback)
    }

    pub fn builder() -> TaskOptionsBuilder<R> {
        TaskOptionsBuilder::default()
    }

    pub fn model_source(&self) -> &ModelSource {
        &self.model_source
    }

    pub fn running_mode(&self) -> RunningMode {
        self.running_mode
    }

    pub fn result_callback(&self) -> Option<&ResultCallback<R>> {
        self.result_callback.as_ref()
    }

    pub(crate) fn into_parts(self) -> (ModelSource, RunningMode, Option<ResultCallback<R>>) {
        (self.model_source, self.running_mode, self.result_callback)
    }
}

pub struct TaskOptionsBuilder<R> {
    base_options: BaseOptions,
    running_mode: Option<RunningMode>,
    result_callback: Option<ResultCallback<R>>,
}

impl<R> Default for TaskOptionsBuilder<R> {
    fn default() -> Self {
        Self {
            base_options: BaseOptions::default(),
            running_mode: None,
            result_callback: None,
        }
    }
}

impl<R> TaskOptionsBuilder<R> {
    pub fn with_model_path(mut self, path: impl AsRef<Path>) -> Self {
        self.base_options.model_asset_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_model_buffer(mut self, buffer: impl Into<Vec<u8>>) -> Self {
        self.base_options.model_asset_buffer = Some(buffer.into());
        self
    }

    pub fn with_base_options(mut self, base_options: BaseOptions) -> Self {
        self.base_options = base_options;
        self
    }

    pub fn with_running_mode(mut self, running_mode: RunningMode) -> Self {
        self.running_mode = Some(running_mode);
        self
    }

    pub fn with_result_callback(
        mut self,
        callback: impl Fn(LiveStreamResult<R>) + Send + Sync + 'static,
    ) -> Self {
        self.result_callback = Some(ResultCallback::new(callback));
        self
    }

    pub fn build(self) -> Result<TaskOptions<R>, ConfigurationError> {
        TaskOptions::new(self.base_options, self.running_mode, self.result_callback)
    }
}

/// Normalized rectangle, all coordinates in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn is_normalized(&self) -> bool {
        let in_range = |v: f32| (0.0..=1.0).contains(&v);
        in_range(self.left)
            && in_range(self.top)
            && in_range(self.right)
            && in_range(self.bottom)
            && self.left < self.right
            && self.top < self.bottom
    }
}

/// Per-call pre-processing applied before the frame reaches the model.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ImageProcessingOptions {
    pub region_of_interest: Option<Rect>,
    /// Clockwise rotation, a multiple of 90.
    pub rotation_degrees: i32,
}

impl ImageProcessingOptions {
    pub fn with_region_of_interest(mut self, region: Rect) -> Self {
        self.region_of_interest = Some(region);
        self
    }

    pub fn with_rotation_degrees(mut self, degrees: i32) -> Self {
        self.rotation_degrees = degrees;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.rotation_degrees % 90 != 0 {
            return Err(ConfigurationError::InvalidRotation(self.rotation_degrees));
        }
        match self.region_of_interest {
            Some(region) if !region.is_normalized() => {
                Err(ConfigurationError::InvalidRegionOfInterest(region))
            }
            _ => Ok(()),
        }
    }
}
