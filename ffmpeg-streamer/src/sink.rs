use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;

use ffmpeg_next::codec::Id;
use serde::{Deserialize, Serialize};

/// Frame rate shared by worker pacing and the codec time base.
pub const DEFAULT_FPS: u32 = 30;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    Mpeg4,
    H264,
    Hevc,
    Mpeg1,
    Mpeg2,
    Mjpeg,
    RawVideo,
}

impl VideoCodec {
    pub fn id(&self) -> Id {
        match self {
            VideoCodec::Mpeg4 => Id::MPEG4,
            VideoCodec::H264 => Id::H264,
            VideoCodec::Hevc => Id::HEVC,
            VideoCodec::Mpeg1 => Id::MPEG1VIDEO,
            VideoCodec::Mpeg2 => Id::MPEG2VIDEO,
            VideoCodec::Mjpeg => Id::MJPEG,
            VideoCodec::RawVideo => Id::RAWVIDEO,
        }
    }

    /// Pixel format handed to the codec.
    pub fn pixel_format(&self) -> ffmpeg_next::format::Pixel {
        match self {
            VideoCodec::Mjpeg => ffmpeg_next::format::Pixel::YUVJ420P,
            _ => ffmpeg_next::format::Pixel::YUV420P,
        }
    }

    pub fn max_b_frames(&self) -> usize {
        match self {
            VideoCodec::Mpeg2 => 2,
            _ => 0,
        }
    }

    /// Low latency private options for encoders that understand them.
    pub fn default_options(&self) -> ffmpeg_next::Dictionary<'static> {
        let mut opts = ffmpeg_next::Dictionary::new();
        if matches!(self, VideoCodec::H264 | VideoCodec::Hevc) {
            opts.set("preset", "ultrafast");
            opts.set("tune", "zerolatency");
        }
        opts
    }
}

/// Where and how the encoded stream is sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub address: Ipv4Addr,
    pub port: u16,
    // muxer name, also used as the url scheme: "rtp", "rtsp"
    pub protocol: String,
    pub path: String,
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    // bps
    pub bit_rate: usize,
    pub fps: u32,
    pub gop_size: u32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::LOCALHOST,
            port: 8554,
            protocol: "rtp".to_string(),
            path: "kstream".to_string(),
            codec: VideoCodec::Mpeg4,
            width: 640,
            height: 480,
            bit_rate: 3_500_000,
            fps: DEFAULT_FPS,
            gop_size: 12,
        }
    }
}

impl SinkConfig {
    pub fn new(width: u32, height: u32, bit_rate: usize) -> Self {
        Self {
            width,
            height,
            bit_rate,
            ..Default::default()
        }
    }

    pub fn with_codec(mut self, codec: VideoCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_address(mut self, address: Ipv4Addr, port: u16) -> Self {
        self.address = address;
        self.port = port;
        self
    }

    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}/{}",
            self.protocol, self.address, self.port, self.path
        )
    }

    /// Milliseconds between two frames at the configured rate.
    pub fn frame_interval_ms(&self) -> u64 {
        1000 / self.fps.max(1) as u64
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.width == 0 || self.height == 0 {
            anyhow::bail!("invalid video size {}x{}", self.width, self.height);
        }
        // 4:2:0 subsampling
        if self.width % 2 != 0 || self.height % 2 != 0 {
            anyhow::bail!(
                "video size {}x{} must be a multiple of two",
                self.width,
                self.height
            );
        }
        if self.fps == 0 {
            anyhow::bail!("fps must be positive");
        }
        if self.protocol.is_empty() {
            anyhow::bail!("protocol must not be empty");
        }
        Ok(())
    }
}

impl Display for SinkConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:?} {}x{}@{} {}bps",
            self.url(),
            self.codec,
            self.width,
            self.height,
            self.fps,
            self.bit_rate
        )
    }
}
