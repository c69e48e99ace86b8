use std::sync::Arc;
use std::time::Duration;

use crate::{
    encoder::FrameEncoder,
    error::ErrorCode,
    frame::VideoFrame,
    pool::FramePool,
    session::{Session, StreamState},
    source::BoxedFrameSource,
};

/// Invoked with every frame the encoder accepted.
pub type FrameCallback = Arc<dyn Fn(&VideoFrame) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    /// The controller left the streaming state.
    StopRequested,
    /// The source returned no frame.
    EndOfSource,
}

/// What the worker thread hands back when it is joined.
pub struct WorkerOutcome<E> {
    pub encoder: E,
    pub exit: WorkerExit,
    pub frames: u64,
}

/// Drives one session: pull, encode, notify, pace. Owns the source and encoder while running.
pub struct StreamWorker<E: FrameEncoder> {
    session: Arc<Session>,
    source: BoxedFrameSource,
    encoder: E,
    callback: Option<FrameCallback>,
    pool: FramePool,
    interval: Duration,
}

impl<E: FrameEncoder> StreamWorker<E> {
    pub fn new(
        session: Arc<Session>,
        source: BoxedFrameSource,
        encoder: E,
        callback: Option<FrameCallback>,
        fps: u32,
    ) -> Self {
        let fps = fps.max(1);
        Self {
            session,
            source,
            encoder,
            callback,
            pool: FramePool::new(fps as usize),
            interval: Duration::from_millis(1000 / fps as u64),
        }
    }

    pub fn run(mut self) -> WorkerOutcome<E> {
        let mut frames = 0u64;
        let exit = loop {
            if !self.session.is_streaming() {
                break WorkerExit::StopRequested;
            }
            let Some(frame) = self.source.next_frame() else {
                break WorkerExit::EndOfSource;
            };

            match self.encoder.encode(&frame) {
                Ok(()) => {
                    frames += 1;
                    if let Some(callback) = &self.callback {
                        callback(self.pool.store(&frame));
                    }
                }
                Err(e) => {
                    log::warn!("encode frame {} failed: {}", frames, e);
                    self.session.record_error(ErrorCode::Encoder);
                }
            }

            if !self.interval.is_zero() {
                std::thread::sleep(self.interval);
            }
        };

        log::info!("stream worker exit: {:?}, frames: {}", exit, frames);
        if let Err(e) = self.encoder.flush() {
            log::warn!("flush failed: {}", e);
            self.session.record_error(ErrorCode::Encoder);
        }
        drop(self.source);

        if exit == WorkerExit::EndOfSource {
            // end of source tears down like a stop
            self.encoder.deinitialize();
            self.session.set_state(StreamState::Stopped);
        }

        WorkerOutcome {
            encoder: self.encoder,
            exit,
            frames,
        }
    }
}
