use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use ffmpeg_streamer::{
    StreamController, StreamEncoder, StreamState, SystemDevices, capture::CaptureSpec,
};
use tokio_util::sync::CancellationToken;

mod config;

fn init_logging(level: log::LevelFilter) {
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .filter_module("ffmpeg_next", level)
        .filter_module("ffmpeg_streamer", level)
        .init();
}

fn build_controller(config: &config::AppConfig) -> StreamController {
    let mut devices = SystemDevices::new();
    if let Some(stereo) = &config.stereo_device {
        devices = devices.with_side_by_side_stereo(CaptureSpec::new(stereo));
    }
    StreamController::with_parts(devices, StreamEncoder::new)
}

async fn write_sdp(controller: &StreamController, config: &config::AppConfig) -> anyhow::Result<()> {
    let Some(path) = &config.sdp_path else {
        return Ok(());
    };
    match controller.sdp() {
        Some(sdp) => {
            tokio::fs::write(path, sdp)
                .await
                .with_context(|| format!("write sdp {}", path.display()))?;
            log::info!("sdp written to {}", path.display());
        }
        None => log::warn!("{} has no session description", config.sink.url()),
    }
    Ok(())
}

/// Cancels `cancel` on the first ctrl-c. The handler is installed once for the process.
fn watch_interrupt(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {},
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => log::info!("interrupted, stopping"),
                    Err(e) => log::error!("listen for ctrl-c: {}", e),
                }
                cancel.cancel();
            },
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = config::Args::parse();
    let config = config::load(&args)?;
    init_logging(config.log_level);
    ffmpeg_streamer::init()?;

    log::info!(
        "camstream v{}: {} -> {}",
        env!("CARGO_PKG_VERSION"),
        config.device,
        config.sink
    );

    let mut controller = build_controller(&config);
    let sink = config.sink.clone();
    let device = config.device.clone();
    let (controller, started) = tokio::task::spawn_blocking(move || {
        let started = controller.configure(sink) && {
            controller.select_device(device);
            controller.start()
        };
        (controller, started)
    })
    .await?;
    if !started {
        anyhow::bail!("stream not started: {}", controller.get_last_error());
    }
    write_sdp(&controller, &config).await?;

    let cancel = CancellationToken::new();
    let _interrupt = watch_interrupt(cancel.clone());

    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = ticker.tick() => {
                if controller.state() == StreamState::Stopped {
                    log::info!("source finished");
                    cancel.cancel();
                }
            },
        }
    }

    let controller = tokio::task::spawn_blocking(move || {
        let mut controller = controller;
        controller.stop();
        controller
    })
    .await?;
    if let Some(stats) = controller.stats() {
        log::info!(
            "frames submitted: {}, packets written: {}",
            stats.frames_submitted,
            stats.packets_written
        );
    }
    let last_error = controller.get_last_error();
    if last_error.is_error() {
        log::warn!("last error: {}", last_error);
    }
    Ok(())
}
