use crate::acquire::{ModelHandle, acquire};
use crate::dispatch::{Dispatcher, FrameOutcome, StreamWorker, TaskCore, lock};
use crate::engine::{InferenceEngine, RunParams};
use crate::error::{ConfigurationError, EngineError, ResourceError, StateError, TaskResult};
use crate::image::Image;
use crate::options::{
    ImageProcessingOptions, ResultCallback, RunningMode, TaskConfig, TaskOptions,
};
use crate::type_name::base_type_name;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[cfg(test)]
mod tests;

/// What a concrete task (stylizer, detector, classifier, ...) plugs into [`VisionTask`]: the
/// engine it runs on, its result type and how one frame becomes a result.
pub trait TaskStrategy: Send + Sync + 'static {
    type Engine: InferenceEngine;
    type Result: Send + 'static;

    /// Name used in logs and for the live stream thread.
    fn name(&self) -> String
    where
        Self: Sized,
    {
        base_type_name::<Self>()
    }

    fn invoke(
        &self,
        model: &ModelHandle<Self::Engine>,
        image: &Image,
        params: &RunParams,
    ) -> Result<Self::Result, EngineError>;
}

/// A vision task bound to a loaded model and a fixed running mode.
///
/// The model is released exactly once, by the first of [`VisionTask::close`],
/// [`VisionTask::scope`] exit or drop. Every call made after that fails with
/// [`StateError::Closed`].
pub struct VisionTask<S: TaskStrategy> {
    name: String,
    core: Arc<TaskCore<S>>,
    dispatcher: Dispatcher,
    closed: AtomicBool,
    close_lock: Mutex<()>,
}

impl<S: TaskStrategy> VisionTask<S> {
    /// Creates an image mode task from a model file.
    pub fn create_from_model_path(
        engine: Arc<S::Engine>,
        strategy: S,
        path: impl Into<PathBuf>,
    ) -> TaskResult<Self> {
        let options = TaskOptions::from_model_path(path)?;
        Self::create_from_options(engine, strategy, options)
    }

    pub fn create_from_config(
        engine: Arc<S::Engine>,
        strategy: S,
        config: TaskConfig,
        result_callback: Option<ResultCallback<S::Result>>,
    ) -> TaskResult<Self> {
        let options = TaskOptions::from_config(config, result_callback)?;
        Self::create_from_options(engine, strategy, options)
    }

    pub fn create_from_options(
        engine: Arc<S::Engine>,
        strategy: S,
        options: TaskOptions<S::Result>,
    ) -> TaskResult<Self> {
        let name = strategy.name();
        let model = acquire(&engine, &options)?;
        let (_, running_mode, result_callback) = options.into_parts();
        let core = Arc::new(TaskCore::new(strategy, model));

        let dispatcher = match (running_mode, result_callback) {
            (RunningMode::Image, _) => Dispatcher::Image,
            (RunningMode::Video, _) => Dispatcher::Video(Mutex::default()),
            (RunningMode::LiveStream, Some(callback)) => Dispatcher::LiveStream(
                StreamWorker::spawn(&name, core.clone(), callback)
                    .map_err(ResourceError::WorkerSpawn)?,
            ),
            (RunningMode::LiveStream, None) => {
                return Err(ConfigurationError::MissingResultCallback.into());
            }
        };

        log::info!(
            "Created task '{name}' in {running_mode} mode on engine '{}'",
            engine.name()
        );
        Ok(Self {
            name,
            core,
            dispatcher,
            closed: AtomicBool::new(false),
            close_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn running_mode(&self) -> RunningMode {
        self.dispatcher.running_mode()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Processes a single image. Image mode only.
    pub fn process(
        &self,
        image: &Image,
        options: Option<&ImageProcessingOptions>,
    ) -> TaskResult<S::Result> {
        self.ensure_open()?;
        self.expect_mode(RunningMode::Image)?;
        let outcome = self.process_frame(image, options, None)?;
        self.completed(RunningMode::Image, outcome)
    }

    /// Processes one decoded video frame. Video mode only, timestamps must strictly increase.
    pub fn process_video(
        &self,
        image: &Image,
        options: Option<&ImageProcessingOptions>,
        timestamp_ms: i64,
    ) -> TaskResult<S::Result> {
        self.ensure_open()?;
        self.expect_mode(RunningMode::Video)?;
        let outcome = self.process_frame(image, options, Some(timestamp_ms))?;
        self.completed(RunningMode::Video, outcome)
    }

    /// Queues a live frame and returns immediately. Live stream mode only; the result is
    /// delivered to the result callback.
    pub fn process_async(
        &self,
        image: &Image,
        options: Option<&ImageProcessingOptions>,
        timestamp_ms: i64,
    ) -> TaskResult<()> {
        self.ensure_open()?;
        self.expect_mode(RunningMode::LiveStream)?;
        match self.process_frame(image, options, Some(timestamp_ms))? {
            FrameOutcome::Queued => Ok(()),
            FrameOutcome::Completed(_) => Err(ConfigurationError::RunningModeMismatch {
                expected: RunningMode::LiveStream,
                current: self.running_mode(),
            }
            .into()),
        }
    }

    /// Routes a frame through the dispatcher of the task's running mode. The call shape is
    /// checked against the mode: a timestamp is required in video and live stream modes and
    /// refused in image mode.
    pub fn process_frame(
        &self,
        image: &Image,
        options: Option<&ImageProcessingOptions>,
        timestamp_ms: Option<i64>,
    ) -> TaskResult<FrameOutcome<S::Result>> {
        self.ensure_open()?;
        let default_options = ImageProcessingOptions::default();
        let options = options.unwrap_or(&default_options);
        self.dispatcher
            .dispatch(&self.core, image, options, timestamp_ms)
    }

    /// Releases the model. Idempotent and infallible: release problems are logged.
    ///
    /// In live stream mode new submissions are refused first, then every frame already queued
    /// is delivered before the model goes away. An in-flight synchronous call is waited for.
    /// Concurrent callers all return only once the model is released. Called from the result
    /// callback, it only refuses new submissions: the delivery thread drains the queue and
    /// releases the model after the callback returns.
    pub fn close(&self) {
        let first = !self.closed.swap(true, Ordering::SeqCst);

        if let Dispatcher::LiveStream(worker) = &self.dispatcher {
            if worker.is_delivery_thread() {
                worker.stop_accepting();
                if first {
                    log::debug!("Task '{}' closed from its result callback", self.name);
                }
                return;
            }
        }

        let _closing = lock(&self.close_lock);
        if let Dispatcher::LiveStream(worker) = &self.dispatcher {
            worker.shutdown();
        }
        let released = self.core.release();
        if first || released {
            log::info!("Closed task '{}'", self.name);
        }
    }

    /// Runs `f` with the task, then closes it. The task is closed on every exit path, including
    /// a panic in `f`.
    pub fn scope<T>(self, f: impl FnOnce(&Self) -> T) -> T {
        let output = f(&self);
        self.close();
        output
    }

    fn ensure_open(&self) -> Result<(), StateError> {
        if self.is_closed() {
            return Err(StateError::Closed);
        }
        Ok(())
    }

    fn expect_mode(&self, expected: RunningMode) -> Result<(), ConfigurationError> {
        let current = self.running_mode();
        if current != expected {
            return Err(ConfigurationError::RunningModeMismatch { expected, current });
        }
        Ok(())
    }

    fn completed(
        &self,
        expected: RunningMode,
        outcome: FrameOutcome<S::Result>,
    ) -> TaskResult<S::Result> {
        match outcome {
            FrameOutcome::Completed(result) => Ok(result),
            FrameOutcome::Queued => Err(ConfigurationError::RunningModeMismatch {
                expected,
                current: self.running_mode(),
            }
            .into()),
        }
    }
}

impl<S: TaskStrategy> Drop for VisionTask<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: TaskStrategy> Debug for VisionTask<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionTask")
            .field("name", &self.name)
            .field("running_mode", &self.running_mode())
            .field("closed", &self.is_closed())
            .finish()
    }
}
