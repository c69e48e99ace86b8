use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::controller::StreamController;
use crate::encoder::{EncoderState, FrameEncoder};
use crate::error::{EncoderError, ErrorCode, SourceError};
use crate::frame::VideoFrame;
use crate::session::StreamState;
use crate::sink::SinkConfig;
use crate::source::{BoxedFrameSource, DeviceProvider, DeviceSelector, FrameSource, SystemDevices};
use crate::stereo::{StereoPair, StereoRig};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Call {
    Initialize,
    Encode { width: u32, height: u32 },
    Flush,
    Deinitialize,
}

/// Encoder double that records every call into a shared log.
#[derive(Clone, Default)]
struct RecordingEncoder {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_initialize: bool,
    fail_encode_at: Option<usize>,
    state: EncoderState,
    last_error: ErrorCode,
}

impl RecordingEncoder {
    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl FrameEncoder for RecordingEncoder {
    fn initialize(&mut self, _sink: &SinkConfig) -> Result<(), EncoderError> {
        self.push(Call::Initialize);
        if self.fail_initialize {
            self.last_error = ErrorCode::OpenSink;
            return Err(EncoderError::OpenSink {
                url: "rtp://127.0.0.1:8554/kstream".to_string(),
                source: ffmpeg_next::Error::InvalidData,
            });
        }
        self.state = EncoderState::Ready;
        self.last_error = ErrorCode::NoError;
        Ok(())
    }

    fn encode(&mut self, frame: &VideoFrame) -> Result<(), EncoderError> {
        self.push(Call::Encode {
            width: frame.width(),
            height: frame.height(),
        });
        let encoded = self.calls().encodes();
        if self.fail_encode_at == Some(encoded) {
            let err = EncoderError::InvalidFrame(frame.to_string());
            self.last_error = err.code();
            return Err(err);
        }
        self.state = EncoderState::Streaming;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EncoderError> {
        self.push(Call::Flush);
        self.state = EncoderState::Draining;
        Ok(())
    }

    fn deinitialize(&mut self) {
        if matches!(self.state, EncoderState::Uninitialized | EncoderState::Closed) {
            return;
        }
        self.push(Call::Deinitialize);
        self.state = EncoderState::Closed;
    }

    fn state(&self) -> EncoderState {
        self.state
    }

    fn last_error(&self) -> ErrorCode {
        self.last_error
    }

    fn clear_error(&mut self) {
        self.last_error = ErrorCode::NoError;
    }
}

struct Calls(Vec<Call>);

impl Calls {
    fn encodes(&self) -> usize {
        self.0
            .iter()
            .filter(|call| matches!(call, Call::Encode { .. }))
            .count()
    }

    fn count(&self, wanted: &Call) -> usize {
        self.0.iter().filter(|call| *call == wanted).count()
    }
}

impl RecordingEncoder {
    fn calls(&self) -> Calls {
        Calls(self.calls.lock().unwrap().clone())
    }
}

/// Yields a fixed number of frames, or forever when `remaining` is `None`.
struct ScriptedSource {
    remaining: Option<usize>,
    open: Arc<AtomicUsize>,
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Option<VideoFrame> {
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.checked_sub(1)?;
        }
        Some(VideoFrame::filled(64, 48, [1, 2, 3]))
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Counts opens and tracks how many sources are alive at once.
#[derive(Clone, Default)]
struct CountingDevices {
    frames: Option<usize>,
    fail: bool,
    /// Refuse every open once this many succeeded.
    fail_after: Option<usize>,
    opened: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    max_open: Arc<AtomicUsize>,
}

impl DeviceProvider for CountingDevices {
    fn open(&self, selector: &DeviceSelector) -> Result<BoxedFrameSource, SourceError> {
        let exhausted = self
            .fail_after
            .is_some_and(|n| self.opened.load(Ordering::SeqCst) >= n);
        if self.fail || exhausted {
            return Err(SourceError::Open {
                url: selector.to_string(),
                reason: anyhow::anyhow!("device busy"),
            });
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now_open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now_open, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            remaining: self.frames,
            open: self.open.clone(),
        }))
    }
}

/// Blocks in `next_frame` until the test sends or hangs up.
struct BlockingSource(Receiver<VideoFrame>);

impl FrameSource for BlockingSource {
    fn next_frame(&mut self) -> Option<VideoFrame> {
        self.0.recv().ok()
    }
}

struct BlockingDevices(Mutex<Option<Receiver<VideoFrame>>>);

impl DeviceProvider for BlockingDevices {
    fn open(&self, _selector: &DeviceSelector) -> Result<BoxedFrameSource, SourceError> {
        let rx = self.0.lock().unwrap().take().ok_or(SourceError::NoStereoDevice)?;
        Ok(Box::new(BlockingSource(rx)))
    }
}

struct SimulatedRig {
    remaining: usize,
}

impl StereoRig for SimulatedRig {
    fn grab(&mut self) -> Option<StereoPair> {
        self.remaining = self.remaining.checked_sub(1)?;
        Some(StereoPair {
            left: VideoFrame::filled(100, 100, [10, 10, 10]),
            right: VideoFrame::filled(100, 100, [200, 200, 200]),
        })
    }
}

fn fast_sink() -> SinkConfig {
    SinkConfig {
        fps: 1000,
        ..SinkConfig::new(64, 48, 400_000)
    }
}

fn controller_with(
    devices: impl DeviceProvider + 'static,
    encoder: RecordingEncoder,
) -> StreamController<RecordingEncoder> {
    let mut controller = StreamController::with_parts(devices, move || encoder.clone());
    assert!(controller.configure(fast_sink()));
    controller
}

fn wait_for_state(controller: &StreamController<RecordingEncoder>, state: StreamState) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while controller.state() != state {
        assert!(Instant::now() < deadline, "timed out waiting for {:?}", state);
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_ten_frames_then_end_of_stream() {
    let encoder = RecordingEncoder::default();
    let devices = CountingDevices {
        frames: Some(10),
        ..Default::default()
    };
    let mut controller = controller_with(devices, encoder.clone());

    assert!(controller.start());
    wait_for_state(&controller, StreamState::Stopped);
    // end of source closes the sink without a stop call
    let calls = encoder.calls();
    assert_eq!(calls.count(&Call::Flush), 1);
    assert_eq!(calls.count(&Call::Deinitialize), 1);
    controller.stop();

    let calls = encoder.calls();
    assert_eq!(calls.encodes(), 10);
    assert_eq!(calls.count(&Call::Flush), 1);
    assert_eq!(calls.count(&Call::Deinitialize), 1);
    assert_eq!(calls.0.last(), Some(&Call::Deinitialize));
    assert_eq!(controller.get_last_error(), ErrorCode::NoError);
    assert_eq!(controller.state(), StreamState::Stopped);
}

#[test]
fn test_stereo_composite_frames() {
    let encoder = RecordingEncoder::default();
    let devices =
        SystemDevices::new().with_stereo_rig(|| Ok(Box::new(SimulatedRig { remaining: 5 }) as _));
    let mut controller = controller_with(devices, encoder.clone());

    let halves = Arc::new(Mutex::new(Vec::new()));
    let seen = halves.clone();
    controller.set_frame_callback(move |frame| {
        seen.lock()
            .unwrap()
            .push((frame.pixel(0, 0), frame.pixel(199, 99)));
    });
    controller.select_device(DeviceSelector::StereoComposite);

    assert!(controller.start());
    wait_for_state(&controller, StreamState::Stopped);
    controller.stop();

    let calls = encoder.calls();
    assert_eq!(calls.encodes(), 5);
    assert_eq!(
        calls.count(&Call::Encode {
            width: 200,
            height: 100
        }),
        5
    );
    let halves = halves.lock().unwrap();
    assert_eq!(halves.len(), 5);
    assert!(
        halves
            .iter()
            .all(|(left, right)| *left == [10, 10, 10] && *right == [200, 200, 200])
    );
}

#[test]
fn test_restart_never_opens_twice() {
    let encoder = RecordingEncoder::default();
    let devices = CountingDevices::default();
    let mut controller = controller_with(devices.clone(), encoder.clone());

    assert!(controller.start());
    assert!(controller.start());
    assert!(controller.is_streaming());
    assert_eq!(devices.opened.load(Ordering::SeqCst), 2);
    assert_eq!(devices.max_open.load(Ordering::SeqCst), 1);
    assert_eq!(encoder.calls().count(&Call::Flush), 1);

    controller.stop();
    assert_eq!(devices.open.load(Ordering::SeqCst), 0);
    let calls = encoder.calls();
    assert_eq!(calls.count(&Call::Flush), 2);
    assert_eq!(calls.count(&Call::Deinitialize), 2);
}

#[test]
fn test_stop_is_idempotent() {
    let encoder = RecordingEncoder::default();
    let mut controller = controller_with(CountingDevices::default(), encoder.clone());

    let started = Instant::now();
    controller.stop();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(controller.state(), StreamState::Idle);

    assert!(controller.start());
    controller.stop();
    controller.stop();
    assert_eq!(controller.state(), StreamState::Stopped);
    assert_eq!(encoder.calls().count(&Call::Flush), 1);
}

#[test]
fn test_stop_racing_end_of_stream_flushes_once() {
    for frames in 0..20 {
        let encoder = RecordingEncoder::default();
        let devices = CountingDevices {
            frames: Some(frames % 4),
            ..Default::default()
        };
        let mut controller = controller_with(devices, encoder.clone());
        assert!(controller.start());
        if frames % 2 == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        controller.stop();
        assert_eq!(encoder.calls().count(&Call::Flush), 1, "run {}", frames);
    }
}

#[test]
fn test_source_open_failure() {
    let encoder = RecordingEncoder::default();
    let devices = CountingDevices {
        fail: true,
        ..Default::default()
    };
    let mut controller = controller_with(devices, encoder.clone());

    assert!(!controller.start());
    assert_eq!(controller.get_last_error(), ErrorCode::SourceNotOpened);
    assert!(!controller.is_streaming());
    assert_eq!(encoder.calls().encodes(), 0);

    let mut controller = controller_with(SystemDevices::new(), RecordingEncoder::default());
    controller.select_device(DeviceSelector::StereoLeft);
    assert!(!controller.start());
    assert_eq!(controller.get_last_error(), ErrorCode::SourceNotOpened);
}

#[test]
fn test_manual_feed() {
    let encoder = RecordingEncoder::default();
    let mut controller = controller_with(SystemDevices::new(), encoder.clone());
    controller.select_device(DeviceSelector::Manual);
    assert!(!controller.send_frame_manually(VideoFrame::filled(8, 8, [0, 0, 0])));

    assert!(controller.start());
    for _ in 0..3 {
        assert!(controller.send_frame_manually(VideoFrame::filled(8, 8, [0, 0, 0])));
        let deadline = Instant::now() + Duration::from_secs(5);
        let before = encoder.calls().encodes();
        while encoder.calls().encodes() == before {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }
    }
    controller.stop();

    let calls = encoder.calls();
    assert_eq!(calls.count(&Call::Encode { width: 8, height: 8 }), 3);
    assert_eq!(calls.count(&Call::Flush), 1);
    assert!(!controller.send_frame_manually(VideoFrame::filled(8, 8, [0, 0, 0])));
}

#[test]
fn test_callback_skips_failed_frames() {
    let encoder = RecordingEncoder {
        fail_encode_at: Some(2),
        ..Default::default()
    };
    let devices = CountingDevices {
        frames: Some(10),
        ..Default::default()
    };
    let mut controller = controller_with(devices, encoder.clone());
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    controller.set_frame_callback(move |_frame| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    assert!(controller.start());
    wait_for_state(&controller, StreamState::Stopped);
    controller.stop();

    assert_eq!(encoder.calls().encodes(), 10);
    assert_eq!(count.load(Ordering::SeqCst), 9);
    assert_eq!(controller.get_last_error(), ErrorCode::EncodeFrame);
}

#[test]
fn test_stale_encoder_error_does_not_hide_open_failure() {
    let encoder = RecordingEncoder {
        fail_encode_at: Some(1),
        ..Default::default()
    };
    let devices = CountingDevices {
        frames: Some(3),
        fail_after: Some(1),
        ..Default::default()
    };
    let mut controller = controller_with(devices, encoder.clone());

    assert!(controller.start());
    wait_for_state(&controller, StreamState::Stopped);
    controller.stop();
    assert_eq!(controller.get_last_error(), ErrorCode::EncodeFrame);

    assert!(!controller.start());
    assert_eq!(controller.get_last_error(), ErrorCode::SourceNotOpened);
}

#[test]
fn test_configure_after_end_of_source_applies_now() {
    let encoder = RecordingEncoder::default();
    let devices = CountingDevices {
        frames: Some(2),
        ..Default::default()
    };
    let mut controller = controller_with(devices, encoder.clone());

    assert!(controller.start());
    wait_for_state(&controller, StreamState::Stopped);
    assert!(controller.configure(fast_sink()));
    let calls = encoder.calls();
    assert_eq!(calls.count(&Call::Initialize), 2);
    assert_eq!(calls.count(&Call::Deinitialize), 1);
    assert_eq!(calls.count(&Call::Flush), 1);
}

#[test]
fn test_stop_timeout_on_blocked_source() {
    let encoder = RecordingEncoder::default();
    let (tx, rx) = std::sync::mpsc::channel();
    let devices = BlockingDevices(Mutex::new(Some(rx)));
    let mut controller = controller_with(devices, encoder.clone());

    assert!(controller.start());
    assert!(!controller.stop_timeout(Duration::from_millis(50)));
    assert_eq!(controller.state(), StreamState::StoppingFlush);
    assert_eq!(encoder.calls().count(&Call::Flush), 0);

    drop(tx);
    assert!(controller.stop_timeout(Duration::from_secs(5)));
    assert_eq!(controller.state(), StreamState::Stopped);
    assert_eq!(encoder.calls().count(&Call::Flush), 1);
    assert!(controller.stop_timeout(Duration::from_millis(1)));
}

#[test]
fn test_last_error_prefers_pending_encoder_error() {
    let encoder = RecordingEncoder {
        fail_initialize: true,
        ..Default::default()
    };
    let mut controller = StreamController::with_parts(CountingDevices::default(), move || {
        encoder.clone()
    });
    assert!(!controller.configure(fast_sink()));
    assert_eq!(controller.get_last_error(), ErrorCode::OpenSink);
    assert!(!controller.start());
    assert_eq!(controller.get_last_error(), ErrorCode::OpenSink);

    let mut controller = controller_with(
        CountingDevices {
            fail: true,
            ..Default::default()
        },
        RecordingEncoder::default(),
    );
    assert!(!controller.start());
    assert_eq!(controller.get_last_error(), ErrorCode::SourceNotOpened);
}

#[test]
fn test_configure_while_streaming_applies_on_restart() {
    let encoder = RecordingEncoder::default();
    let mut controller = controller_with(CountingDevices::default(), encoder.clone());
    assert!(controller.start());
    assert!(controller.configure(SinkConfig {
        fps: 500,
        ..fast_sink()
    }));
    assert_eq!(encoder.calls().count(&Call::Initialize), 1);

    controller.stop();
    assert!(controller.start());
    controller.stop();
    assert_eq!(encoder.calls().count(&Call::Initialize), 2);
}
