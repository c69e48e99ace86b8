use std::ffi::CString;
use std::path::Path;

use ffmpeg_next::{Dictionary, Rational, format::Pixel, software::scaling::flag::Flags};

use crate::{frame::VideoFrame, scaler::Scaler, source::FrameSource};

/// Input url plus an optional forced demuxer (`-f`), e.g. "v4l2".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureSpec {
    pub url: String,
    pub format: Option<String>,
}

impl CaptureSpec {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            format: None,
        }
    }

    pub fn camera(index: u32) -> Self {
        #[cfg(target_os = "linux")]
        {
            Self {
                url: format!("/dev/video{}", index),
                format: Some("v4l2".to_string()),
            }
        }
        #[cfg(not(target_os = "linux"))]
        {
            Self {
                url: index.to_string(),
                format: None,
            }
        }
    }
}

/// Decodes the first video stream of an ffmpeg input into packed BGR24 frames.
pub struct CameraCapture {
    input: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::codec::decoder::Video,
    stream_index: usize,
    time_base: Rational,
    scaler: Option<Scaler>,
    draining: bool,
    finished: bool,
}

impl CameraCapture {
    /// Resolve input format by name (e.g. "v4l2") via FFmpeg's av_find_input_format.
    fn find_input_format(name: &str) -> anyhow::Result<ffmpeg_next::format::format::Input> {
        let cname = CString::new(name)
            .map_err(|e| anyhow::anyhow!("invalid format name {:?}: {}", name, e))?;
        let ptr = unsafe { ffmpeg_next::ffi::av_find_input_format(cname.as_ptr()) };
        if ptr.is_null() {
            return Err(anyhow::anyhow!("input format not found: {}", name));
        }
        Ok(unsafe { ffmpeg_next::format::format::Input::wrap(ptr as *mut _) })
    }

    pub fn open(spec: &CaptureSpec) -> anyhow::Result<Self> {
        use ffmpeg_next::format::format::Format;

        let path = Path::new(&spec.url);
        let input = match spec.format.as_deref() {
            Some(fmt_name) => {
                let fmt = Self::find_input_format(fmt_name)?;
                ffmpeg_next::format::open_with(path, &Format::Input(fmt), Dictionary::new())?
                    .input()
            }
            None => ffmpeg_next::format::input(path)?,
        };

        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or(anyhow::anyhow!("no video stream in {}", spec.url))?;
        let stream_index = stream.index();
        let time_base = stream.time_base();

        let mut decoder_ctx = ffmpeg_next::codec::Context::from_parameters(stream.parameters())?;
        unsafe {
            (*decoder_ctx.as_mut_ptr()).time_base = time_base.into();
        }
        let decoder = decoder_ctx.decoder().video()?;
        if decoder.format() == Pixel::None || decoder.width() == 0 || decoder.height() == 0 {
            return Err(anyhow::anyhow!("missing codec parameters for {}", spec.url));
        }

        log::info!(
            "capture opened: {}, stream index: {}, {}x{} {:?}, time_base: {:?}",
            spec.url,
            stream_index,
            decoder.width(),
            decoder.height(),
            decoder.format(),
            time_base
        );

        Ok(Self {
            input,
            decoder,
            stream_index,
            time_base,
            scaler: None,
            draining: false,
            finished: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.decoder.width()
    }

    pub fn height(&self) -> u32 {
        self.decoder.height()
    }

    fn receive_frame(&mut self) -> anyhow::Result<Option<ffmpeg_next::frame::Video>> {
        let mut frame = ffmpeg_next::frame::Video::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            Err(ffmpeg_next::Error::Eof) => {
                self.finished = true;
                Ok(None)
            }
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn to_bgr(&mut self, decoded: &ffmpeg_next::frame::Video) -> anyhow::Result<VideoFrame> {
        if decoded.format() == Pixel::BGR24 {
            return VideoFrame::from_av_frame(decoded);
        }
        let scaler = self.scaler.get_or_insert_with(|| {
            Scaler::new(
                Pixel::BGR24,
                decoded.width(),
                decoded.height(),
                Flags::BILINEAR,
            )
        });
        let mut converted = ffmpeg_next::frame::Video::empty();
        scaler.run(decoded, &mut converted)?;
        VideoFrame::from_av_frame(&converted)
    }

    /// Pulls packets until the decoder yields a picture or the input runs dry.
    fn read_frame(&mut self) -> anyhow::Result<Option<VideoFrame>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            if let Some(decoded) = self.receive_frame()? {
                return self.to_bgr(&decoded).map(Some);
            }
            if self.draining {
                // EAGAIN after eof means nothing is left
                self.finished = true;
                return Ok(None);
            }
            match self.input.packets().next() {
                Some((stream, mut packet)) => {
                    if stream.index() != self.stream_index {
                        continue;
                    }
                    packet.rescale_ts(self.time_base, self.decoder.time_base());
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        log::warn!("capture send packet error: {}", e);
                    }
                }
                None => {
                    log::debug!("capture input exhausted, draining decoder");
                    self.decoder.send_eof()?;
                    self.draining = true;
                }
            }
        }
    }
}

impl FrameSource for CameraCapture {
    fn next_frame(&mut self) -> Option<VideoFrame> {
        match self.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("capture grab failed: {:#}", e);
                self.finished = true;
                None
            }
        }
    }
}

unsafe impl Send for CameraCapture {}
