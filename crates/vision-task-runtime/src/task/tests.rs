use super::*;
use crate::engine::PassthroughEngine;
use crate::error::{SequencingError, TaskError};
use crate::image::ImageFormat;
use crate::options::{LiveStreamResult, Rect};
use anyhow::anyhow;
use rstest::{fixture, rstest};
use std::sync::atomic::{AtomicI64, AtomicUsize};
use std::sync::{OnceLock, Weak};
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Echo;

impl TaskStrategy for Echo {
    type Engine = PassthroughEngine;
    type Result = Image;

    fn invoke(
        &self,
        model: &ModelHandle<PassthroughEngine>,
        image: &Image,
        params: &RunParams,
    ) -> Result<Image, EngineError> {
        model.run(image, params)
    }
}

/// Fails on odd timestamps, panics on timestamps divisible by 10.
struct Flaky;

impl TaskStrategy for Flaky {
    type Engine = PassthroughEngine;
    type Result = i64;

    fn invoke(
        &self,
        _model: &ModelHandle<PassthroughEngine>,
        _image: &Image,
        params: &RunParams,
    ) -> Result<i64, EngineError> {
        let timestamp_ms = params.timestamp_ms.unwrap_or_default();
        if timestamp_ms % 10 == 0 {
            panic!("graph exploded at {timestamp_ms}");
        }
        if timestamp_ms % 2 == 1 {
            return Err(EngineError::Run(anyhow!("odd frame {timestamp_ms}")));
        }
        Ok(timestamp_ms)
    }
}

/// Records whether two invocations ever ran at the same time.
#[derive(Default)]
struct OverlapProbe {
    in_flight: AtomicBool,
    overlapped: AtomicBool,
    calls: AtomicUsize,
}

impl TaskStrategy for Arc<OverlapProbe> {
    type Engine = PassthroughEngine;
    type Result = ();

    fn invoke(
        &self,
        _model: &ModelHandle<PassthroughEngine>,
        _image: &Image,
        _params: &RunParams,
    ) -> Result<(), EngineError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        std::thread::sleep(Duration::from_millis(1));
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.in_flight.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[fixture]
fn engine() -> Arc<PassthroughEngine> {
    Arc::new(PassthroughEngine::new())
}

fn frame() -> Image {
    Image::from_raw(2, 2, ImageFormat::Rgb8, (0u8..12).collect::<Vec<_>>()).unwrap()
}

fn options<R>(running_mode: RunningMode) -> TaskOptions<R> {
    TaskOptions::builder()
        .with_model_buffer(PassthroughEngine::placeholder_model())
        .with_running_mode(running_mode)
        .build()
        .unwrap()
}

fn live_options<R: Send + 'static>(
    callback: impl Fn(LiveStreamResult<R>) + Send + Sync + 'static,
) -> TaskOptions<R> {
    TaskOptions::builder()
        .with_model_buffer(PassthroughEngine::placeholder_model())
        .with_running_mode(RunningMode::LiveStream)
        .with_result_callback(callback)
        .build()
        .unwrap()
}

fn wait_until(condition: impl Fn() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < TIMEOUT, "condition not met in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[rstest]
fn image_mode_returns_the_same_image(engine: Arc<PassthroughEngine>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("face_stylizer.tflite");
    std::fs::write(&path, PassthroughEngine::placeholder_model()).unwrap();

    let task = VisionTask::create_from_model_path(engine.clone(), Echo, &path).unwrap();
    assert_eq!(task.name(), "Echo");
    assert_eq!(task.running_mode(), RunningMode::Image);

    let output = task.process(&frame(), None).unwrap();
    assert_eq!(output, frame());
    assert_eq!(engine.loaded_graphs(), 1);
}

#[rstest]
fn invalid_model_path_is_reported(engine: Arc<PassthroughEngine>) {
    let err =
        VisionTask::create_from_model_path(engine.clone(), Echo, "/path/to/invalid/model.tflite")
            .unwrap_err();
    assert!(matches!(err, TaskError::Resource(_)));
    assert!(
        err.to_string()
            .contains("Unable to open file at /path/to/invalid/model.tflite")
    );
    assert_eq!(engine.loaded_graphs(), 0);
}

#[rstest]
fn live_stream_config_without_callback_is_rejected(engine: Arc<PassthroughEngine>) {
    let config = TaskConfig::from_toml_str(
        r#"
        running_mode = "live_stream"

        [base_options]
        model_asset_path = "face_stylizer.tflite"
        "#,
    )
    .unwrap();
    let err = VisionTask::create_from_config(engine.clone(), Echo, config, None).unwrap_err();
    assert!(matches!(
        err,
        TaskError::Configuration(ConfigurationError::MissingResultCallback)
    ));
    assert_eq!(engine.loaded_graphs(), 0);
}

#[rstest]
fn close_is_idempotent(engine: Arc<PassthroughEngine>) {
    let task =
        VisionTask::create_from_options(engine.clone(), Echo, options(RunningMode::Image)).unwrap();
    task.close();
    task.close();

    assert!(task.is_closed());
    assert_eq!(engine.loaded_graphs(), 0);
    let err = task.process(&frame(), None).unwrap_err();
    assert!(err.is_closed());
}

#[rstest]
fn scope_closes_the_task(engine: Arc<PassthroughEngine>) {
    let task =
        VisionTask::create_from_options(engine.clone(), Echo, options(RunningMode::Image)).unwrap();
    let output = task.scope(|task| task.process(&frame(), None).unwrap());

    assert_eq!(output, frame());
    assert_eq!(engine.loaded_graphs(), 0);
}

#[rstest]
fn drop_closes_the_task(engine: Arc<PassthroughEngine>) {
    let task =
        VisionTask::create_from_options(engine.clone(), Echo, options(RunningMode::Video)).unwrap();
    assert_eq!(engine.loaded_graphs(), 1);
    drop(task);
    assert_eq!(engine.loaded_graphs(), 0);
}

#[rstest]
fn image_task_refuses_video_calls(engine: Arc<PassthroughEngine>) {
    let task = VisionTask::create_from_options(engine, Echo, options(RunningMode::Image)).unwrap();

    let err = task.process_video(&frame(), None, 1).unwrap_err();
    assert!(matches!(
        err,
        TaskError::Configuration(ConfigurationError::RunningModeMismatch {
            expected: RunningMode::Video,
            current: RunningMode::Image,
        })
    ));
    assert_eq!(
        err.to_string(),
        "Task is not initialized with the video mode. Current running mode: image"
    );

    let err = task.process_async(&frame(), None, 1).unwrap_err();
    assert!(matches!(
        err,
        TaskError::Configuration(ConfigurationError::RunningModeMismatch { .. })
    ));
}

#[rstest]
#[case(RunningMode::Video)]
#[case(RunningMode::LiveStream)]
fn image_calls_are_refused_in_other_modes(
    engine: Arc<PassthroughEngine>,
    #[case] running_mode: RunningMode,
) {
    let options = match running_mode {
        RunningMode::LiveStream => live_options(|_| {}),
        _ => options(running_mode),
    };
    let task = VisionTask::create_from_options(engine, Echo, options).unwrap();

    let err = task.process(&frame(), None).unwrap_err();
    assert!(matches!(
        err,
        TaskError::Configuration(ConfigurationError::RunningModeMismatch {
            expected: RunningMode::Image,
            current,
        }) if current == running_mode
    ));
}

#[rstest]
fn timestamps_are_checked_against_the_mode(engine: Arc<PassthroughEngine>) {
    let image_task =
        VisionTask::create_from_options(engine.clone(), Echo, options(RunningMode::Image)).unwrap();
    let err = image_task.process_frame(&frame(), None, Some(1)).unwrap_err();
    assert!(matches!(
        err,
        TaskError::Configuration(ConfigurationError::UnexpectedTimestamp)
    ));

    let video_task =
        VisionTask::create_from_options(engine, Echo, options(RunningMode::Video)).unwrap();
    let err = video_task.process_frame(&frame(), None, None).unwrap_err();
    assert!(matches!(
        err,
        TaskError::Configuration(ConfigurationError::MissingTimestamp(RunningMode::Video))
    ));
}

#[rstest]
fn video_timestamps_must_strictly_increase(engine: Arc<PassthroughEngine>) {
    let task = VisionTask::create_from_options(engine, Echo, options(RunningMode::Video)).unwrap();

    task.process_video(&frame(), None, 1).unwrap();
    task.process_video(&frame(), None, 2).unwrap();
    let err = task.process_video(&frame(), None, 2).unwrap_err();
    assert!(matches!(
        err,
        TaskError::Sequencing(SequencingError {
            timestamp_ms: 2,
            last_timestamp_ms: 2,
        })
    ));
    assert!(err.to_string().contains("monotonically increasing"));

    task.process_video(&frame(), None, 3).unwrap();
}

#[rstest]
fn processing_options_are_applied_and_validated(engine: Arc<PassthroughEngine>) {
    let task = VisionTask::create_from_options(engine, Echo, options(RunningMode::Image)).unwrap();

    let rotated = task
        .process(
            &frame(),
            Some(&ImageProcessingOptions::default().with_rotation_degrees(90)),
        )
        .unwrap();
    assert_eq!((rotated.width(), rotated.height()), (2, 2));
    assert_ne!(rotated, frame());

    let cropped = task
        .process(
            &frame(),
            Some(
                &ImageProcessingOptions::default()
                    .with_region_of_interest(Rect::new(0.0, 0.0, 0.5, 1.0)),
            ),
        )
        .unwrap();
    assert_eq!((cropped.width(), cropped.height()), (1, 2));

    let err = task
        .process(
            &frame(),
            Some(&ImageProcessingOptions::default().with_rotation_degrees(45)),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        TaskError::Configuration(ConfigurationError::InvalidRotation(45))
    ));
}

#[rstest]
fn live_stream_delivers_every_frame_in_order(engine: Arc<PassthroughEngine>) {
    let (tx, rx) = crossbeam::channel::unbounded();
    let task = VisionTask::create_from_options(
        engine.clone(),
        Echo,
        live_options(move |result: LiveStreamResult<Image>| {
            tx.send(result).unwrap();
        }),
    )
    .unwrap();

    for timestamp_ms in 1..=10 {
        task.process_async(&frame(), None, timestamp_ms).unwrap();
    }
    task.close();

    let delivered: Vec<_> = rx.try_iter().collect();
    assert_eq!(
        delivered.iter().map(|r| r.timestamp_ms).collect::<Vec<_>>(),
        (1..=10).collect::<Vec<_>>()
    );
    for result in &delivered {
        assert_eq!(result.input, frame());
        assert_eq!(result.result.as_ref().unwrap(), &frame());
    }
    assert_eq!(engine.loaded_graphs(), 0);

    let err = task.process_async(&frame(), None, 11).unwrap_err();
    assert!(err.is_closed());
}

#[rstest]
fn live_stream_rejects_out_of_order_timestamps(engine: Arc<PassthroughEngine>) {
    let (tx, rx) = crossbeam::channel::unbounded();
    let task = VisionTask::create_from_options(
        engine,
        Echo,
        live_options(move |result: LiveStreamResult<Image>| {
            tx.send(result.timestamp_ms).unwrap();
        }),
    )
    .unwrap();

    task.process_async(&frame(), None, 5).unwrap();
    for timestamp_ms in [3, 5] {
        let err = task.process_async(&frame(), None, timestamp_ms).unwrap_err();
        assert!(matches!(err, TaskError::Sequencing(_)));
    }
    task.process_async(&frame(), None, 6).unwrap();
    task.close();

    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![5, 6]);
}

#[rstest]
fn engine_failures_reach_the_callback(engine: Arc<PassthroughEngine>) {
    let (tx, rx) = crossbeam::channel::unbounded();
    let task = VisionTask::create_from_options(
        engine,
        Flaky,
        live_options(move |result: LiveStreamResult<i64>| {
            tx.send((result.timestamp_ms, result.result)).unwrap();
        }),
    )
    .unwrap();

    for timestamp_ms in [1, 2, 10, 12] {
        task.process_async(&frame(), None, timestamp_ms).unwrap();
    }
    task.close();

    let delivered: Vec<_> = rx.try_iter().collect();
    assert_eq!(delivered.len(), 4);
    assert!(matches!(&delivered[0], (1, Err(TaskError::Engine(EngineError::Run(_))))));
    assert!(matches!(&delivered[1], (2, Ok(2))));
    let (_, panicked) = &delivered[2];
    assert!(
        panicked
            .as_ref()
            .unwrap_err()
            .to_string()
            .contains("panicked")
    );
    assert!(matches!(&delivered[3], (12, Ok(12))));
}

#[rstest]
fn callback_panics_do_not_stop_delivery(engine: Arc<PassthroughEngine>) {
    let (tx, rx) = crossbeam::channel::unbounded();
    let task = VisionTask::create_from_options(
        engine,
        Echo,
        live_options(move |result: LiveStreamResult<Image>| {
            if result.timestamp_ms == 2 {
                panic!("callback failure");
            }
            tx.send(result.timestamp_ms).unwrap();
        }),
    )
    .unwrap();

    for timestamp_ms in 1..=3 {
        task.process_async(&frame(), None, timestamp_ms).unwrap();
    }
    task.close();

    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![1, 3]);
}

#[rstest]
fn close_from_the_callback_drains_the_queue(engine: Arc<PassthroughEngine>) {
    let (gate_tx, gate_rx) = crossbeam::channel::bounded::<()>(1);
    let (tx, rx) = crossbeam::channel::unbounded();
    let slot: Arc<OnceLock<Weak<VisionTask<Echo>>>> = Arc::new(OnceLock::new());

    let callback_slot = slot.clone();
    let task = Arc::new(
        VisionTask::create_from_options(
            engine.clone(),
            Echo,
            live_options(move |result: LiveStreamResult<Image>| {
                if result.timestamp_ms == 1 {
                    gate_rx.recv_timeout(TIMEOUT).unwrap();
                }
                if result.timestamp_ms == 3 {
                    if let Some(task) = callback_slot.get().and_then(Weak::upgrade) {
                        task.close();
                    }
                }
                tx.send(result.timestamp_ms).unwrap();
            }),
        )
        .unwrap(),
    );
    slot.set(Arc::downgrade(&task)).unwrap();

    for timestamp_ms in 1..=5 {
        task.process_async(&frame(), None, timestamp_ms).unwrap();
    }
    gate_tx.send(()).unwrap();

    let delivered: Vec<_> = (0..5)
        .map(|_| rx.recv_timeout(TIMEOUT).unwrap())
        .collect();
    assert_eq!(delivered, vec![1, 2, 3, 4, 5]);
    wait_until(|| engine.loaded_graphs() == 0);

    assert!(task.is_closed());
    let err = task.process_async(&frame(), None, 6).unwrap_err();
    assert!(err.is_closed());
}

#[rstest]
fn concurrent_calls_never_overlap(engine: Arc<PassthroughEngine>) {
    let probe = Arc::new(OverlapProbe::default());
    let task =
        VisionTask::create_from_options(engine, probe.clone(), options(RunningMode::Image))
            .unwrap();

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..10 {
                    task.process(&frame(), None).unwrap();
                }
            });
        }
    });

    assert_eq!(probe.calls.load(Ordering::SeqCst), 40);
    assert!(!probe.overlapped.load(Ordering::SeqCst));
}

#[rstest]
fn close_waits_for_in_flight_video_call(engine: Arc<PassthroughEngine>) {
    let probe = Arc::new(OverlapProbe::default());
    let task = VisionTask::create_from_options(
        engine.clone(),
        probe.clone(),
        options(RunningMode::Video),
    )
    .unwrap();

    std::thread::scope(|s| {
        s.spawn(|| {
            for timestamp_ms in 0..20 {
                match task.process_video(&frame(), None, timestamp_ms) {
                    Ok(()) => {}
                    Err(e) => {
                        assert!(e.is_closed());
                        break;
                    }
                }
            }
        });
        std::thread::sleep(Duration::from_millis(5));
        task.close();
    });

    assert_eq!(engine.loaded_graphs(), 0);
    assert!(!probe.in_flight.load(Ordering::SeqCst));
}

#[rstest]
fn closed_task_reports_closed_before_mode_mismatch(engine: Arc<PassthroughEngine>) {
    let task = VisionTask::create_from_options(engine, Echo, options(RunningMode::Video)).unwrap();
    task.close();

    assert!(task.process(&frame(), None).unwrap_err().is_closed());
    assert!(task.process_video(&frame(), None, 1).unwrap_err().is_closed());
    assert!(task.process_async(&frame(), None, 1).unwrap_err().is_closed());
}

#[rstest]
fn concurrent_close_waits_for_the_drain(engine: Arc<PassthroughEngine>) {
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    let task = VisionTask::create_from_options(
        engine.clone(),
        Echo,
        live_options(move |_: LiveStreamResult<Image>| {
            std::thread::sleep(Duration::from_millis(20));
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .unwrap();

    for timestamp_ms in 1..=5 {
        task.process_async(&frame(), None, timestamp_ms).unwrap();
    }

    std::thread::scope(|s| {
        s.spawn(|| task.close());
        std::thread::sleep(Duration::from_millis(5));
        s.spawn(|| {
            task.close();
            assert_eq!(delivered.load(Ordering::SeqCst), 5);
            assert_eq!(engine.loaded_graphs(), 0);
        });
    });
}

#[rstest]
fn concurrent_submitters_are_delivered_in_timestamp_order(engine: Arc<PassthroughEngine>) {
    let (tx, rx) = crossbeam::channel::unbounded();
    let task = VisionTask::create_from_options(
        engine,
        Echo,
        live_options(move |result: LiveStreamResult<Image>| {
            tx.send(result.timestamp_ms).unwrap();
        }),
    )
    .unwrap();
    let next_timestamp = AtomicI64::new(0);
    let accepted = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..100 {
                    let timestamp_ms = next_timestamp.fetch_add(1, Ordering::SeqCst);
                    match task.process_async(&frame(), None, timestamp_ms) {
                        Ok(()) => {
                            accepted.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => assert!(matches!(e, TaskError::Sequencing(_))),
                    }
                }
            });
        }
    });
    task.close();

    let delivered: Vec<i64> = rx.try_iter().collect();
    assert_eq!(delivered.len(), accepted.load(Ordering::SeqCst));
    assert!(!delivered.is_empty());
    assert!(delivered.windows(2).all(|pair| pair[0] < pair[1]));
}

#[rstest]
fn close_racing_submitters_delivers_every_accepted_frame(engine: Arc<PassthroughEngine>) {
    let (tx, rx) = crossbeam::channel::unbounded();
    let task = VisionTask::create_from_options(
        engine.clone(),
        Echo,
        live_options(move |result: LiveStreamResult<Image>| {
            tx.send(result.timestamp_ms).unwrap();
        }),
    )
    .unwrap();
    let next_timestamp = AtomicI64::new(0);
    let accepted = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                loop {
                    let timestamp_ms = next_timestamp.fetch_add(1, Ordering::SeqCst);
                    match task.process_async(&frame(), None, timestamp_ms) {
                        Ok(()) => {
                            accepted.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) if e.is_closed() => break,
                        Err(e) => assert!(matches!(e, TaskError::Sequencing(_))),
                    }
                }
            });
        }
        std::thread::sleep(Duration::from_millis(10));
        task.close();
    });

    let delivered: Vec<i64> = rx.try_iter().collect();
    assert_eq!(delivered.len(), accepted.load(Ordering::SeqCst));
    assert!(delivered.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(engine.loaded_graphs(), 0);
}
