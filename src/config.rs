use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use ffmpeg_streamer::{DeviceSelector, SinkConfig};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StereoViewArg {
    Left,
    Right,
    Composite,
}

/// camstream command line arguments
#[derive(Parser, Debug, Default)]
#[command(name = "camstream")]
#[command(version, about = "Stream a camera to an rtp sink", long_about = None)]
pub struct Args {
    /// JSON config file, flags below override its values
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Sink address
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    pub address: Option<Ipv4Addr>,

    /// Sink port
    #[arg(short = 'p', long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Local camera index
    #[arg(short = 'd', long, value_name = "INDEX", conflicts_with = "input")]
    pub device_index: Option<u32>,

    /// File, url or device path to capture instead of a camera
    #[arg(short = 'i', long, value_name = "URL")]
    pub input: Option<String>,

    /// Side by side stereo camera to attach, e.g. /dev/video2
    #[arg(long, value_name = "URL")]
    pub stereo_device: Option<String>,

    /// Which stereo view to stream, requires a stereo device
    #[arg(long, value_name = "VIEW", conflicts_with_all = ["input", "device_index"])]
    pub stereo_view: Option<StereoViewArg>,

    /// Write the session description for rtp receivers here
    #[arg(long, value_name = "FILE")]
    pub sdp: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL")]
    pub log_level: Option<log::LevelFilter>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sink: SinkConfig,
    pub device: DeviceSelector,
    pub stereo_device: Option<String>,
    pub sdp_path: Option<PathBuf>,
    pub log_level: log::LevelFilter,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sink: SinkConfig::default(),
            device: DeviceSelector::default(),
            stereo_device: None,
            sdp_path: None,
            log_level: log::LevelFilter::Info,
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parse config {}", path.display()))
    }

    fn apply(&mut self, args: &Args) {
        if let Some(address) = args.address {
            self.sink.address = address;
        }
        if let Some(port) = args.port {
            self.sink.port = port;
        }
        if let Some(index) = args.device_index {
            self.device = DeviceSelector::Camera { index };
        }
        if let Some(url) = &args.input {
            self.device = DeviceSelector::Url {
                url: url.clone(),
                format: None,
            };
        }
        if let Some(stereo) = &args.stereo_device {
            self.stereo_device = Some(stereo.clone());
        }
        if let Some(view) = args.stereo_view {
            self.device = match view {
                StereoViewArg::Left => DeviceSelector::StereoLeft,
                StereoViewArg::Right => DeviceSelector::StereoRight,
                StereoViewArg::Composite => DeviceSelector::StereoComposite,
            };
        }
        if let Some(path) = &args.sdp {
            self.sdp_path = Some(path.clone());
        }
        if let Some(level) = args.log_level {
            self.log_level = level;
        }
    }
}

/// Config file (if any) with command line overrides applied.
pub fn load(args: &Args) -> anyhow::Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    config.apply(args);
    config
        .sink
        .validate()
        .context("invalid sink configuration")?;
    if config.device.stereo_view().is_some() && config.stereo_device.is_none() {
        log::warn!("{} selected without a stereo device", config.device);
    }
    Ok(config)
}
