use std::sync::mpsc::{Receiver, SyncSender, TrySendError};

use crate::{frame::VideoFrame, source::FrameSource};

/// Queue depth between the caller and the worker.
const MANUAL_QUEUE_BOUND: usize = 8;

/// Caller side of a manual source. Dropping every feed ends the stream.
#[derive(Clone)]
pub struct ManualFeed {
    tx: SyncSender<VideoFrame>,
}

impl ManualFeed {
    /// Queues a frame; drops it when the worker is behind or gone.
    pub fn send(&self, frame: VideoFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("manual frame queue full, frame dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

pub struct ManualSource {
    rx: Receiver<VideoFrame>,
}

impl ManualSource {
    pub fn channel() -> (ManualFeed, ManualSource) {
        let (tx, rx) = std::sync::mpsc::sync_channel(MANUAL_QUEUE_BOUND);
        (ManualFeed { tx }, ManualSource { rx })
    }
}

impl FrameSource for ManualSource {
    fn next_frame(&mut self) -> Option<VideoFrame> {
        self.rx.recv().ok().filter(|frame| !frame.is_empty())
    }
}
