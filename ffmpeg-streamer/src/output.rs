use std::ffi::{CStr, CString};

use ffmpeg_next::{Dictionary, Rational, format::Flags};

use crate::error::EncoderError;

/// Network muxer: container state plus the sink it writes to.
pub struct NetOutput {
    inner: ffmpeg_next::format::context::Output,
    url: String,
    have_written_header: bool,
    have_written_trailer: bool,
}

impl NetOutput {
    /// Allocates the container for `format` ("rtp", "rtsp", ...) without opening the sink.
    pub fn alloc(url: &str, format: &str) -> Result<Self, EncoderError> {
        let c_url = CString::new(url).map_err(|_| EncoderError::AllocContext {
            url: url.to_string(),
            source: ffmpeg_next::Error::InvalidData,
        })?;
        let c_format = CString::new(format)
            .map_err(|_| EncoderError::OutputFormat(format.to_string()))?;

        let mut ptr = std::ptr::null_mut();
        let ret = unsafe {
            ffmpeg_next::ffi::avformat_alloc_output_context2(
                &mut ptr,
                std::ptr::null_mut(),
                c_format.as_ptr(),
                c_url.as_ptr(),
            )
        };
        if ptr.is_null() {
            let source = if ret < 0 {
                ffmpeg_next::Error::from(ret)
            } else {
                ffmpeg_next::Error::Unknown
            };
            return Err(EncoderError::AllocContext {
                url: url.to_string(),
                source,
            });
        }
        let inner = unsafe { ffmpeg_next::format::context::Output::wrap(ptr) };
        if unsafe { (*ptr).oformat.is_null() } {
            return Err(EncoderError::OutputFormat(url.to_string()));
        }

        Ok(Self {
            inner,
            url: url.to_string(),
            have_written_header: false,
            have_written_trailer: false,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Some formats want stream headers to be separate.
    pub fn wants_global_header(&self) -> bool {
        self.inner.format().flags().contains(Flags::GLOBAL_HEADER)
    }

    fn needs_io(&self) -> bool {
        !self.inner.format().flags().contains(Flags::NO_FILE)
    }

    pub fn add_video_stream(
        &mut self,
        codec: ffmpeg_next::Codec,
        encoder: &ffmpeg_next::codec::encoder::Video,
        time_base: Rational,
    ) -> Result<usize, EncoderError> {
        let mut stream = self
            .inner
            .add_stream(codec)
            .map_err(EncoderError::AddStream)?;
        stream.set_parameters(encoder);
        stream.set_time_base(time_base);
        Ok(stream.index())
    }

    /// Opens the network sink unless the muxer manages its own io.
    pub fn open(&mut self) -> Result<(), EncoderError> {
        if !self.needs_io() {
            return Ok(());
        }
        let c_url = CString::new(self.url.as_str()).map_err(|_| EncoderError::OpenSink {
            url: self.url.clone(),
            source: ffmpeg_next::Error::InvalidData,
        })?;
        let ret = unsafe {
            let ctx = self.inner.as_mut_ptr();
            ffmpeg_next::ffi::avio_open(
                &mut (*ctx).pb,
                c_url.as_ptr(),
                ffmpeg_next::ffi::AVIO_FLAG_WRITE as i32,
            )
        };
        if ret < 0 {
            return Err(EncoderError::OpenSink {
                url: self.url.clone(),
                source: ffmpeg_next::Error::from(ret),
            });
        }
        Ok(())
    }

    pub fn write_header(&mut self, options: Dictionary) -> Result<(), EncoderError> {
        self.inner
            .write_header_with(options)
            .map_err(EncoderError::WriteHeader)?;
        self.have_written_header = true;
        ffmpeg_next::format::context::output::dump(&self.inner, 0, Some(self.url.as_str()));
        Ok(())
    }

    pub fn stream_time_base(&self, stream_index: usize) -> Option<Rational> {
        self.inner.stream(stream_index).map(|s| s.time_base())
    }

    /// Rescales `packet` from `time_base` to the stream's and writes it in presentation order.
    pub fn write_packet(
        &mut self,
        stream_index: usize,
        packet: &mut ffmpeg_next::Packet,
        time_base: Rational,
    ) -> Result<(), EncoderError> {
        if !self.have_written_header {
            return Err(EncoderError::NotInitialized);
        }
        let out_time_base = self
            .stream_time_base(stream_index)
            .ok_or(EncoderError::WritePacket(ffmpeg_next::Error::StreamNotFound))?;
        packet.set_stream(stream_index);
        packet.set_position(-1);
        packet.rescale_ts(time_base, out_time_base);
        packet
            .write_interleaved(&mut self.inner)
            .map_err(EncoderError::WritePacket)
    }

    /// Session description for the receiving side of an rtp stream.
    pub fn sdp(&mut self) -> Option<String> {
        if !self.have_written_header {
            return None;
        }
        let mut buf = vec![0 as std::os::raw::c_char; 4096];
        let ret = unsafe {
            let mut ctx = self.inner.as_mut_ptr();
            ffmpeg_next::ffi::av_sdp_create(&mut ctx, 1, buf.as_mut_ptr(), buf.len() as i32)
        };
        if ret < 0 {
            log::debug!(
                "no sdp for {}: {}",
                self.url,
                ffmpeg_next::Error::from(ret)
            );
            return None;
        }
        let sdp = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Some(sdp.to_string_lossy().into_owned())
    }

    /// Writes the trailer once. Must run before the codec feeding this output is closed.
    pub fn finish(&mut self) -> Result<(), ffmpeg_next::Error> {
        if self.have_written_header && !self.have_written_trailer {
            self.have_written_trailer = true;
            self.inner.write_trailer()?;
        }
        Ok(())
    }
}

unsafe impl Send for NetOutput {}
