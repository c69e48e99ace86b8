//! Capture frames from a camera, stereo rig, file or the caller, encode them and
//! send them to a network muxer (rtp by default).

/// Registers FFmpeg components (formats, devices, network). Call once at startup
/// before opening capture devices like v4l2 or network sinks.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))?;
    ffmpeg_next::format::network::init();
    Ok(())
}

pub mod capture;
pub mod controller;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod manual;
pub mod output;
pub mod pool;
pub mod scaler;
pub mod session;
pub mod sink;
pub mod source;
pub mod stereo;
pub mod worker;

pub use controller::StreamController;
pub use encoder::{EncoderState, EncoderStats, FrameEncoder, StreamEncoder};
pub use error::ErrorCode;
pub use frame::VideoFrame;
pub use session::StreamState;
pub use sink::{SinkConfig, VideoCodec};
pub use source::{DeviceProvider, DeviceSelector, FrameSource, SystemDevices};
