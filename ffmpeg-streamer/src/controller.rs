use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::{
    encoder::{EncoderState, EncoderStats, FrameEncoder, StreamEncoder},
    error::ErrorCode,
    frame::VideoFrame,
    manual::{ManualFeed, ManualSource},
    session::{Session, StreamState},
    sink::SinkConfig,
    source::{BoxedFrameSource, DeviceProvider, DeviceSelector, SystemDevices},
    worker::{FrameCallback, StreamWorker, WorkerOutcome},
};

type EncoderFactory<E> = dyn Fn() -> E + Send + Sync;

/// A running worker thread. Dropping it stops and joins the worker.
struct WorkerHandle<E> {
    session: Arc<Session>,
    thread: Option<JoinHandle<WorkerOutcome<E>>>,
    done: Receiver<()>,
}

impl<E> WorkerHandle<E> {
    fn join(mut self) -> Option<WorkerOutcome<E>> {
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                log::error!("stream worker panicked");
                None
            }
        }
    }

    /// Whether the worker returned (or died) within `timeout`.
    fn wait(&self, timeout: Duration) -> bool {
        !matches!(self.done.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }
}

impl<E> Drop for WorkerHandle<E> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.session.request_stop();
            let _ = thread.join();
        }
    }
}

/// Lifecycle manager for one capture-encode-transmit session at a time.
pub struct StreamController<E: FrameEncoder = StreamEncoder> {
    session: Arc<Session>,
    devices: Box<dyn DeviceProvider>,
    encoder_factory: Box<EncoderFactory<E>>,
    selector: DeviceSelector,
    sink: Option<SinkConfig>,
    /// Held here whenever no worker owns it.
    encoder: Option<E>,
    worker: Option<WorkerHandle<E>>,
    callback: Option<FrameCallback>,
    manual: Option<ManualFeed>,
    sdp: Option<String>,
}

impl StreamController<StreamEncoder> {
    pub fn new() -> Self {
        Self::with_parts(SystemDevices::new(), StreamEncoder::new)
    }
}

impl Default for StreamController<StreamEncoder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: FrameEncoder> StreamController<E> {
    pub fn with_parts<D, F>(devices: D, encoder_factory: F) -> Self
    where
        D: DeviceProvider + 'static,
        F: Fn() -> E + Send + Sync + 'static,
    {
        let encoder = encoder_factory();
        Self {
            session: Arc::new(Session::new()),
            devices: Box::new(devices),
            encoder_factory: Box::new(encoder_factory),
            selector: DeviceSelector::default(),
            sink: None,
            encoder: Some(encoder),
            worker: None,
            callback: None,
            manual: None,
            sdp: None,
        }
    }

    /// (Re)initializes the encoder for `sink`. While a session runs the config is
    /// only stored and takes effect on the next [`StreamController::start`].
    pub fn configure(&mut self, sink: SinkConfig) -> bool {
        self.sink = Some(sink.clone());
        if self.worker.is_some() && self.session.state() == StreamState::Stopped {
            // the source ran out; join the exiting worker and reclaim the encoder
            self.stop();
        }
        if self.worker.is_some() {
            log::warn!("stream active, {} applies on next start", sink);
            return true;
        }

        let factory = &self.encoder_factory;
        let encoder = self.encoder.get_or_insert_with(|| factory());
        encoder.deinitialize();
        match encoder.initialize(&sink) {
            Ok(()) => {
                log::info!("configured {}", sink);
                self.sdp = encoder.sdp();
                true
            }
            Err(e) => {
                log::error!("configure {} failed: {}", sink, e);
                self.session.record_error(ErrorCode::Encoder);
                false
            }
        }
    }

    pub fn select_device(&mut self, selector: DeviceSelector) {
        log::info!("selected device {}", selector);
        self.selector = selector;
    }

    /// Registers an observer for every successfully encoded frame. Applies from the next start.
    pub fn set_frame_callback<F>(&mut self, callback: F)
    where
        F: Fn(&VideoFrame) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
    }

    pub fn clear_frame_callback(&mut self) {
        self.callback = None;
    }

    fn open_source(&mut self) -> Option<BoxedFrameSource> {
        if self.selector == DeviceSelector::Manual {
            let (feed, source) = ManualSource::channel();
            self.manual = Some(feed);
            return Some(Box::new(source));
        }
        match self.devices.open(&self.selector) {
            Ok(source) => Some(source),
            Err(e) => {
                log::error!("open source {} failed: {}", self.selector, e);
                self.session.record_error(e.code());
                None
            }
        }
    }

    /// Stops any running session, then opens the selected source and launches the worker.
    pub fn start(&mut self) -> bool {
        self.stop();
        self.session.clear_error();
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.clear_error();
        }

        let Some(source) = self.open_source() else {
            return false;
        };

        let sink = self.sink.clone().unwrap_or_default();
        let factory = &self.encoder_factory;
        let encoder = self.encoder.get_or_insert_with(|| factory());
        if encoder.state() != EncoderState::Ready {
            if let Err(e) = encoder.initialize(&sink) {
                log::error!("initialize encoder for {} failed: {}", sink, e);
                self.session.record_error(ErrorCode::Encoder);
                self.manual = None;
                return false;
            }
        }
        self.sdp = encoder.sdp();
        let Some(encoder) = self.encoder.take() else {
            return false;
        };

        let worker = StreamWorker::new(
            self.session.clone(),
            source,
            encoder,
            self.callback.clone(),
            sink.fps,
        );
        let (done_tx, done) = std::sync::mpsc::channel();
        self.session.set_state(StreamState::Streaming);

        let spawned = std::thread::Builder::new()
            .name("stream-worker".to_string())
            .spawn(move || {
                let outcome = worker.run();
                let _ = done_tx.send(());
                outcome
            });
        match spawned {
            Ok(thread) => {
                log::info!("streaming {} to {}", self.selector, sink.url());
                self.worker = Some(WorkerHandle {
                    session: self.session.clone(),
                    thread: Some(thread),
                    done,
                });
                true
            }
            Err(e) => {
                // source and encoder went down with the closure
                log::error!("spawn stream worker failed: {}", e);
                self.session.record_error(ErrorCode::WorkerNotCreated);
                self.session.set_state(StreamState::Stopped);
                self.manual = None;
                false
            }
        }
    }

    /// Blocks until the worker has flushed and exited. A no-op when nothing runs.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.session.request_stop();
        self.manual = None;
        let outcome = worker.join();

        let mut encoder = match outcome {
            Some(outcome) => {
                log::info!(
                    "stream worker finished: {:?}, {} frames",
                    outcome.exit,
                    outcome.frames
                );
                outcome.encoder
            }
            None => {
                self.session.record_error(ErrorCode::Encoder);
                (self.encoder_factory)()
            }
        };
        encoder.deinitialize();
        self.encoder = Some(encoder);
        self.session.set_state(StreamState::Stopped);
    }

    /// Like [`StreamController::stop`] but gives up after `timeout`. On timeout the
    /// worker stays owned by the controller and a later stop joins it.
    pub fn stop_timeout(&mut self, timeout: Duration) -> bool {
        let Some(worker) = self.worker.as_ref() else {
            return true;
        };
        self.session.request_stop();
        // unblocks a manual source waiting for frames
        self.manual = None;
        if !worker.wait(timeout) {
            log::warn!("stream worker still running after {:?}", timeout);
            return false;
        }
        self.stop();
        true
    }

    /// Pushes a frame into a running manual session.
    pub fn send_frame_manually(&self, frame: VideoFrame) -> bool {
        match &self.manual {
            Some(feed) if self.session.is_streaming() => feed.send(frame),
            _ => false,
        }
    }

    pub fn get_last_error(&self) -> ErrorCode {
        match &self.encoder {
            Some(encoder) if encoder.last_error().is_error() => encoder.last_error(),
            _ => self.session.last_error(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.session.state()
    }

    pub fn is_streaming(&self) -> bool {
        self.session.is_streaming()
    }

    /// Counters of the last finished session, or of the configured encoder when idle.
    pub fn stats(&self) -> Option<EncoderStats> {
        self.encoder.as_ref().map(|encoder| encoder.stats())
    }

    /// Session description of the most recently opened sink.
    pub fn sdp(&self) -> Option<&str> {
        self.sdp.as_deref()
    }
}

impl<E: FrameEncoder> Drop for StreamController<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod controller_test;
