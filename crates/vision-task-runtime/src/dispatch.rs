//! Running-mode dispatch.
//!
//! One [`Dispatcher`] variant per running mode:
//! * Image – frames run on the caller thread, no timestamps.
//! * Video – frames run on the caller thread, timestamps must strictly increase.
//! * LiveStream – frames are queued to a dedicated delivery thread which runs them in
//!   submission order and hands every result to the task's callback.

use crate::acquire::ModelHandle;
use crate::engine::RunParams;
use crate::error::{
    ConfigurationError, EngineError, SequencingError, StateError, TaskError, TaskResult,
};
use crate::image::Image;
use crate::options::{ImageProcessingOptions, LiveStreamResult, ResultCallback, RunningMode};
use crate::task::TaskStrategy;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{JoinHandle, ThreadId};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Strategy plus the model graph it runs on. Shared between the task and its delivery thread.
pub(crate) struct TaskCore<S: TaskStrategy> {
    strategy: S,
    model: Mutex<Option<ModelHandle<S::Engine>>>,
}

impl<S: TaskStrategy> TaskCore<S> {
    pub(crate) fn new(strategy: S, model: ModelHandle<S::Engine>) -> Self {
        Self {
            strategy,
            model: Mutex::new(Some(model)),
        }
    }

    /// Runs one frame. Holds the model lock for the whole call so the engine never sees
    /// overlapping calls on the same graph, and release waits for it.
    pub(crate) fn invoke(&self, image: &Image, params: &RunParams) -> TaskResult<S::Result> {
        let model = lock(&self.model);
        let model = model.as_ref().ok_or(StateError::Closed)?;
        Ok(self.strategy.invoke(model, image, params)?)
    }

    /// Releases the graph. Returns `false` if it was already released.
    pub(crate) fn release(&self) -> bool {
        let Some(model) = lock(&self.model).take() else {
            return false;
        };
        if let Err(e) = model.release() {
            log::warn!("Failed to release model graph: {e}");
        }
        true
    }
}

/// Accepts strictly increasing timestamps.
#[derive(Debug, Default)]
pub(crate) struct TimestampSequencer {
    last_timestamp_ms: Option<i64>,
}

impl TimestampSequencer {
    /// Records `timestamp_ms`. A rejected timestamp leaves the sequencer untouched.
    pub(crate) fn advance(&mut self, timestamp_ms: i64) -> Result<(), SequencingError> {
        if let Some(last_timestamp_ms) = self.last_timestamp_ms {
            if timestamp_ms <= last_timestamp_ms {
                return Err(SequencingError {
                    timestamp_ms,
                    last_timestamp_ms,
                });
            }
        }
        self.last_timestamp_ms = Some(timestamp_ms);
        Ok(())
    }
}

struct Frame {
    image: Image,
    params: RunParams,
    timestamp_ms: i64,
}

struct Submission {
    tx: Option<crossbeam::channel::Sender<Frame>>,
    sequencer: TimestampSequencer,
}

/// Single delivery thread of a live stream task.
pub(crate) struct StreamWorker {
    submission: Mutex<Submission>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl StreamWorker {
    pub(crate) fn spawn<S: TaskStrategy>(
        name: &str,
        core: Arc<TaskCore<S>>,
        callback: ResultCallback<S::Result>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam::channel::unbounded::<Frame>();
        let thread_name = format!("{name}-live-stream");
        let join_handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                for frame in rx.iter() {
                    deliver(&core, &callback, frame);
                }
                log::debug!("Live stream queue of '{thread_name}' drained");
                core.release();
            })?;

        Ok(Self {
            submission: Mutex::new(Submission {
                tx: Some(tx),
                sequencer: TimestampSequencer::default(),
            }),
            thread_id: join_handle.thread().id(),
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    /// Queues a frame. The timestamp check and the enqueue happen under the same lock, so queue
    /// order is timestamp order even with concurrent callers.
    fn submit(&self, image: &Image, params: RunParams, timestamp_ms: i64) -> TaskResult<()> {
        let mut submission = lock(&self.submission);
        let Submission { tx, sequencer } = &mut *submission;
        let tx = tx.as_ref().ok_or(StateError::Closed)?;
        sequencer.advance(timestamp_ms)?;
        tx.send(Frame {
            image: image.clone(),
            params,
            timestamp_ms,
        })
        .map_err(|_| StateError::Closed)?;
        Ok(())
    }

    pub(crate) fn is_delivery_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Refuses further frames. Once the queue is drained the delivery thread releases the model
    /// and exits.
    pub(crate) fn stop_accepting(&self) {
        drop(lock(&self.submission).tx.take());
    }

    /// Stops accepting frames, then waits until every queued frame has been delivered and the
    /// thread has exited. Must not be called from the delivery thread.
    pub(crate) fn shutdown(&self) {
        self.stop_accepting();
        if let Some(join_handle) = lock(&self.join_handle).take() {
            if let Err(e) = join_handle.join() {
                log::error!("Live stream thread panicked: {e:?}");
            }
        }
    }
}

fn deliver<S: TaskStrategy>(core: &TaskCore<S>, callback: &ResultCallback<S::Result>, frame: Frame) {
    let Frame {
        image,
        params,
        timestamp_ms,
    } = frame;

    let result = catch_unwind(AssertUnwindSafe(|| core.invoke(&image, &params)))
        .unwrap_or_else(|_| {
            Err(TaskError::Engine(EngineError::Run(anyhow::anyhow!(
                "Engine panicked while processing frame at {timestamp_ms} ms"
            ))))
        });

    let outcome = LiveStreamResult {
        result,
        input: image,
        timestamp_ms,
    };
    if catch_unwind(AssertUnwindSafe(|| callback.deliver(outcome))).is_err() {
        log::error!("Result callback panicked on frame at {timestamp_ms} ms");
    }
}

/// What happened to a dispatched frame.
#[derive(Debug)]
pub enum FrameOutcome<R> {
    /// The frame ran on the caller thread.
    Completed(R),
    /// The frame was queued, its result goes to the result callback.
    Queued,
}

pub(crate) enum Dispatcher {
    Image,
    Video(Mutex<TimestampSequencer>),
    LiveStream(StreamWorker),
}

impl Dispatcher {
    pub(crate) fn running_mode(&self) -> RunningMode {
        match self {
            Dispatcher::Image => RunningMode::Image,
            Dispatcher::Video(_) => RunningMode::Video,
            Dispatcher::LiveStream(_) => RunningMode::LiveStream,
        }
    }

    /// Routes a frame according to the running mode, after checking that the call carries what
    /// the mode needs.
    pub(crate) fn dispatch<S: TaskStrategy>(
        &self,
        core: &TaskCore<S>,
        image: &Image,
        options: &ImageProcessingOptions,
        timestamp_ms: Option<i64>,
    ) -> TaskResult<FrameOutcome<S::Result>> {
        options.validate()?;

        match (self, timestamp_ms) {
            (Dispatcher::Image, None) => core
                .invoke(image, &RunParams::new(options, None))
                .map(FrameOutcome::Completed),
            (Dispatcher::Image, Some(_)) => Err(ConfigurationError::UnexpectedTimestamp.into()),
            (_, None) => Err(ConfigurationError::MissingTimestamp(self.running_mode()).into()),
            (Dispatcher::Video(sequencer), Some(timestamp_ms)) => {
                let mut sequencer = lock(sequencer);
                sequencer.advance(timestamp_ms)?;
                log::trace!("Processing video frame at {timestamp_ms} ms");
                core.invoke(image, &RunParams::new(options, Some(timestamp_ms)))
                    .map(FrameOutcome::Completed)
            }
            (Dispatcher::LiveStream(worker), Some(timestamp_ms)) => {
                log::trace!("Queueing live stream frame at {timestamp_ms} ms");
                worker
                    .submit(image, RunParams::new(options, Some(timestamp_ms)), timestamp_ms)
                    .map(|()| FrameOutcome::Queued)
            }
        }
    }
}
