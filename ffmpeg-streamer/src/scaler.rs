use ffmpeg_next::{
    format::Pixel,
    software::scaling::{Context, flag::Flags},
};

/// Lazily built conversion context owned by whoever converts frames.
///
/// Rebuilt whenever the source geometry or format changes, so upstream size
/// drift is resized instead of rejected.
pub struct Scaler {
    context: Option<Context>,
    src: (Pixel, u32, u32),
    dst: (Pixel, u32, u32),
    flags: Flags,
}

impl Scaler {
    pub fn new(dst_format: Pixel, dst_width: u32, dst_height: u32, flags: Flags) -> Self {
        Self {
            context: None,
            src: (Pixel::None, 0, 0),
            dst: (dst_format, dst_width, dst_height),
            flags,
        }
    }

    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
        dst: &mut ffmpeg_next::frame::Video,
    ) -> Result<(), ffmpeg_next::Error> {
        let src = (frame.format(), frame.width(), frame.height());
        if self.context.is_none() || self.src != src {
            if self.context.is_some() {
                log::debug!(
                    "scaler source changed {:?} -> {:?}, rebuilding",
                    self.src,
                    src
                );
            }
            let (dst_format, dst_width, dst_height) = self.dst;
            self.context = Some(Context::get(
                src.0, src.1, src.2, dst_format, dst_width, dst_height, self.flags,
            )?);
            self.src = src;
        }
        match self.context.as_mut() {
            Some(context) => context.run(frame, dst),
            None => Err(ffmpeg_next::Error::Bug),
        }
    }
}

unsafe impl Send for Scaler {}
