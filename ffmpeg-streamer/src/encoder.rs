use ffmpeg_next::{Dictionary, Rational, software::scaling::flag::Flags};

use crate::{
    error::{EncoderError, ErrorCode},
    frame::VideoFrame,
    output::NetOutput,
    scaler::Scaler,
    sink::{SinkConfig, VideoCodec},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EncoderState {
    #[default]
    Uninitialized,
    /// Header written, no frame sent yet.
    Ready,
    Streaming,
    /// Flushed; further encode calls are refused.
    Draining,
    Closed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncoderStats {
    pub frames_submitted: u64,
    pub packets_written: u64,
}

/// What the worker drives: encode frames, then one terminal flush.
pub trait FrameEncoder: Send + 'static {
    /// Tears down any previous state and prepares a fresh stream for `sink`.
    fn initialize(&mut self, sink: &SinkConfig) -> Result<(), EncoderError>;

    fn encode(&mut self, frame: &VideoFrame) -> Result<(), EncoderError>;

    /// Emits every packet the codec still buffers. No new pixel data is consumed.
    fn flush(&mut self) -> Result<(), EncoderError>;

    /// Writes the trailer and releases codec and sink. A no-op when nothing is open.
    fn deinitialize(&mut self);

    fn state(&self) -> EncoderState;

    fn last_error(&self) -> ErrorCode;

    /// Forgets the error of a previous session.
    fn clear_error(&mut self);

    fn stats(&self) -> EncoderStats {
        EncoderStats::default()
    }

    fn sdp(&mut self) -> Option<String> {
        None
    }
}

/// Codec plus container state for one stream.
struct EncoderContext {
    output: NetOutput,
    encoder: ffmpeg_next::codec::encoder::Video,
    stream_index: usize,
    encoder_time_base: Rational,
    scaler: Scaler,
    frame_index: i64,
    end_of_stream: bool,
}

impl EncoderContext {
    fn open(sink: &SinkConfig) -> Result<Self, EncoderError> {
        sink.validate()
            .map_err(|e| EncoderError::InvalidConfig(format!("{:#}", e)))?;

        let url = sink.url();
        let mut output = NetOutput::alloc(&url, &sink.protocol)?;

        let codec_id = sink.codec.id();
        let codec =
            ffmpeg_next::encoder::find(codec_id).ok_or(EncoderError::CodecNotFound(codec_id))?;
        let encoder_time_base = Rational(1, sink.fps as i32);

        let mut encoder = ffmpeg_next::codec::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(EncoderError::OpenCodec)?;
        encoder.set_width(sink.width);
        encoder.set_height(sink.height);
        encoder.set_format(sink.codec.pixel_format());
        encoder.set_bit_rate(sink.bit_rate);
        encoder.set_time_base(encoder_time_base);
        encoder.set_frame_rate(Some(Rational(sink.fps as i32, 1)));
        encoder.set_gop(sink.gop_size);
        encoder.set_max_b_frames(sink.codec.max_b_frames());
        if sink.codec == VideoCodec::Mpeg1 {
            // avoid macroblocks whose coefficients overflow
            unsafe {
                (*encoder.as_mut_ptr()).mb_decision = 2;
            }
        }
        if output.wants_global_header() {
            encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder
            .open_with(sink.codec.default_options())
            .map_err(EncoderError::OpenCodec)?;

        let stream_index = output.add_video_stream(codec, &encoder, encoder_time_base)?;
        output.open()?;

        let mut header_opts = Dictionary::new();
        if sink.protocol == "rtsp" {
            header_opts.set("rtsp_transport", "tcp");
        }
        output.write_header(header_opts)?;

        log::info!(
            "encoder opened: {}, stream index: {}, stream time_base: {:?}",
            sink,
            stream_index,
            output.stream_time_base(stream_index)
        );

        Ok(Self {
            output,
            encoder,
            stream_index,
            encoder_time_base,
            scaler: Scaler::new(
                sink.codec.pixel_format(),
                sink.width,
                sink.height,
                Flags::BICUBIC,
            ),
            frame_index: 0,
            end_of_stream: false,
        })
    }

    /// Writes every packet the codec hands out right now.
    fn drain(&mut self) -> Result<u64, EncoderError> {
        let mut written = 0;
        loop {
            let mut packet = ffmpeg_next::Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    self.output
                        .write_packet(self.stream_index, &mut packet, self.encoder_time_base)?;
                    written += 1;
                }
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    break;
                }
                Err(ffmpeg_next::Error::Eof) => break,
                Err(e) => return Err(EncoderError::EncodeFrame(e)),
            }
        }
        Ok(written)
    }

    fn send_frame(&mut self, frame: &VideoFrame) -> Result<u64, EncoderError> {
        if frame.is_empty() || !frame.is_consistent() {
            return Err(EncoderError::InvalidFrame(frame.to_string()));
        }
        let source = frame.to_av_frame();
        let mut converted = ffmpeg_next::frame::Video::empty();
        self.scaler
            .run(&source, &mut converted)
            .map_err(EncoderError::EncodeFrame)?;
        converted.set_pts(Some(self.frame_index));
        self.frame_index += 1;

        self.encoder
            .send_frame(&converted)
            .map_err(EncoderError::EncodeFrame)?;
        self.drain()
    }

    fn send_eof(&mut self) -> Result<u64, EncoderError> {
        self.encoder.send_eof().map_err(EncoderError::EncodeFrame)?;
        let written = self.drain()?;
        self.end_of_stream = true;
        Ok(written)
    }

    /// Trailer first, then the codec, then the sink and container.
    fn close(self) {
        let Self {
            mut output,
            encoder,
            ..
        } = self;
        if let Err(e) = output.finish() {
            log::error!("write trailer error for {}: {}", output.url(), e);
        }
        drop(encoder);
        drop(output);
    }
}

/// Encoder/muxer streaming converted frames to a network sink.
#[derive(Default)]
pub struct StreamEncoder {
    context: Option<EncoderContext>,
    state: EncoderState,
    last_error: ErrorCode,
    stats: EncoderStats,
}

impl StreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn record<T>(&mut self, result: Result<T, EncoderError>) -> Result<T, EncoderError> {
        if let Err(e) = &result {
            self.last_error = e.code();
        }
        result
    }

    fn context(&mut self) -> Result<&mut EncoderContext, EncoderError> {
        match self.context.as_mut() {
            None => Err(EncoderError::NotInitialized),
            Some(context) if context.end_of_stream => Err(EncoderError::EndOfStream),
            Some(context) => Ok(context),
        }
    }
}

impl FrameEncoder for StreamEncoder {
    fn initialize(&mut self, sink: &SinkConfig) -> Result<(), EncoderError> {
        self.deinitialize();
        let result = EncoderContext::open(sink);
        match result {
            Ok(context) => {
                self.context = Some(context);
                self.state = EncoderState::Ready;
                self.last_error = ErrorCode::NoError;
                self.stats = EncoderStats::default();
                Ok(())
            }
            Err(e) => {
                log::error!("encoder initialize failed for {}: {}", sink.url(), e);
                self.record(Err(e))
            }
        }
    }

    fn encode(&mut self, frame: &VideoFrame) -> Result<(), EncoderError> {
        let result = self.context().and_then(|context| context.send_frame(frame));
        let written = self.record(result)?;
        self.state = EncoderState::Streaming;
        self.stats.frames_submitted += 1;
        self.stats.packets_written += written;
        log::trace!(
            "encoded frame {}, packets written: {}",
            self.stats.frames_submitted,
            written
        );
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EncoderError> {
        let result = self.context().and_then(|context| context.send_eof());
        let written = self.record(result)?;
        self.state = EncoderState::Draining;
        self.stats.packets_written += written;
        log::info!(
            "encoder flushed, {} buffered packets written, {} total",
            written,
            self.stats.packets_written
        );
        Ok(())
    }

    fn deinitialize(&mut self) {
        if let Some(context) = self.context.take() {
            context.close();
            self.state = EncoderState::Closed;
            log::info!(
                "encoder closed, frames: {}, packets: {}",
                self.stats.frames_submitted,
                self.stats.packets_written
            );
        }
    }

    fn state(&self) -> EncoderState {
        self.state
    }

    fn last_error(&self) -> ErrorCode {
        self.last_error
    }

    fn clear_error(&mut self) {
        self.last_error = ErrorCode::NoError;
    }

    fn stats(&self) -> EncoderStats {
        self.stats
    }

    fn sdp(&mut self) -> Option<String> {
        self.context.as_mut().and_then(|context| context.output.sdp())
    }
}

impl Drop for StreamEncoder {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

// Codec, scaler and container are only touched by the thread owning the encoder.
unsafe impl Send for StreamEncoder {}

#[cfg(test)]
#[path = "encoder_test.rs"]
mod encoder_test;
