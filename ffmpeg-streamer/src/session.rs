use std::sync::{Mutex, MutexGuard};

use crate::error::ErrorCode;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming,
    StoppingFlush,
    Stopped,
}

#[derive(Debug, Default)]
struct Inner {
    state: StreamState,
    last_error: ErrorCode,
}

/// The only data shared between the controller and its worker.
///
/// Every accessor holds the lock for a single field read or write.
#[derive(Debug, Default)]
pub struct Session {
    inner: Mutex<Inner>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> StreamState {
        self.lock().state
    }

    pub fn set_state(&self, state: StreamState) {
        self.lock().state = state;
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == StreamState::Streaming
    }

    /// Streaming -> StoppingFlush. Returns whether the transition happened.
    pub fn request_stop(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == StreamState::Streaming {
            inner.state = StreamState::StoppingFlush;
            true
        } else {
            false
        }
    }

    pub fn last_error(&self) -> ErrorCode {
        self.lock().last_error
    }

    pub fn record_error(&self, code: ErrorCode) {
        self.lock().last_error = code;
    }

    pub fn clear_error(&self) {
        self.record_error(ErrorCode::NoError);
    }
}
