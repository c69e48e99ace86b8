use std::fmt::{Display, Formatter};

/// Flat error codes handed across the controller boundary.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    SourceNotOpened = 0,
    WorkerNotCreated = 1,
    /// Umbrella for any encoder-stage failure seen by the worker.
    Encoder = 9,
    AllocContext = 10,
    OutputFormat = 11,
    OpenSink = 12,
    WriteHeader = 13,
    CodecNotFound = 14,
    OpenCodec = 15,
    EncodeFrame = 16,
    WritePacket = 17,
    EndOfStream = 18,
    NotInitialized = 19,
    InvalidConfig = 20,
    AddStream = 21,
    NoError = 100,
}

impl ErrorCode {
    pub fn is_error(&self) -> bool {
        *self != ErrorCode::NoError
    }

    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

impl Default for ErrorCode {
    fn default() -> Self {
        ErrorCode::NoError
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.as_i32())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum EncoderError {
    #[error("could not allocate output context for {url}: {source}")]
    AllocContext {
        url: String,
        source: ffmpeg_next::Error,
    },

    #[error("no output format resolved for {0}")]
    OutputFormat(String),

    #[error("invalid sink configuration: {0}")]
    InvalidConfig(String),

    #[error("could not add stream to output: {0}")]
    AddStream(#[source] ffmpeg_next::Error),

    #[error("encoder not found for codec {0:?}")]
    CodecNotFound(ffmpeg_next::codec::Id),

    #[error("could not open codec: {0}")]
    OpenCodec(#[source] ffmpeg_next::Error),

    #[error("could not open sink {url}: {source}")]
    OpenSink {
        url: String,
        source: ffmpeg_next::Error,
    },

    #[error("could not write container header: {0}")]
    WriteHeader(#[source] ffmpeg_next::Error),

    #[error("could not encode frame: {0}")]
    EncodeFrame(#[source] ffmpeg_next::Error),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("could not write packet: {0}")]
    WritePacket(#[source] ffmpeg_next::Error),

    #[error("encoder reached end of stream")]
    EndOfStream,

    #[error("encoder is not initialized")]
    NotInitialized,
}

impl EncoderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EncoderError::AllocContext { .. } => ErrorCode::AllocContext,
            EncoderError::OutputFormat(_) => ErrorCode::OutputFormat,
            EncoderError::InvalidConfig(_) => ErrorCode::InvalidConfig,
            EncoderError::AddStream(_) => ErrorCode::AddStream,
            EncoderError::CodecNotFound(_) => ErrorCode::CodecNotFound,
            EncoderError::OpenCodec(_) => ErrorCode::OpenCodec,
            EncoderError::OpenSink { .. } => ErrorCode::OpenSink,
            EncoderError::WriteHeader(_) => ErrorCode::WriteHeader,
            EncoderError::EncodeFrame(_) | EncoderError::InvalidFrame(_) => ErrorCode::EncodeFrame,
            EncoderError::WritePacket(_) => ErrorCode::WritePacket,
            EncoderError::EndOfStream => ErrorCode::EndOfStream,
            EncoderError::NotInitialized => ErrorCode::NotInitialized,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("no stereo device attached")]
    NoStereoDevice,

    #[error("manual feed is not available")]
    NoManualFeed,

    #[error("could not open capture {url}: {reason:#}")]
    Open { url: String, reason: anyhow::Error },
}

impl SourceError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::SourceNotOpened
    }
}
