use std::fmt::{Display, Formatter};

use bytes::Bytes;
use ffmpeg_next::format::Pixel;

/// Bytes per pixel of the packed BGR24 layout every source produces.
pub const BGR24_BPP: usize = 3;

/// A captured picture in packed BGR24, rows stored without padding.
///
/// `data` always holds exactly `width * height * 3` bytes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    data: Bytes,
    width: u32,
    height: u32,
}

impl VideoFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> anyhow::Result<Self> {
        let expected = Self::byte_len(width, height);
        if data.len() != expected {
            anyhow::bail!(
                "frame {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            );
        }
        Ok(Self {
            data: Bytes::from(data),
            width,
            height,
        })
    }

    /// A frame filled with one BGR color.
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let data = bgr
            .iter()
            .copied()
            .cycle()
            .take(Self::byte_len(width, height))
            .collect::<Vec<u8>>();
        Self {
            data: Bytes::from(data),
            width,
            height,
        }
    }

    /// Skips the length check so tests can build frames no public constructor allows.
    #[cfg(test)]
    pub(crate) fn from_raw_parts_unchecked(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data: Bytes::from(data),
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Whether the buffer length matches the dimensions.
    pub fn is_consistent(&self) -> bool {
        self.data.len() == Self::byte_len(self.width, self.height)
    }

    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BGR24_BPP
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    pub fn stride(&self) -> usize {
        self.width as usize * BGR24_BPP
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let offset = x as usize * BGR24_BPP;
        let row = self.row(y);
        [row[offset], row[offset + 1], row[offset + 2]]
    }

    /// Copies the columns `[x, x + width)` into a new frame of full height.
    pub fn crop_columns(&self, x: u32, width: u32) -> anyhow::Result<Self> {
        if x + width > self.width {
            anyhow::bail!(
                "crop {}+{} exceeds frame width {}",
                x,
                width,
                self.width
            );
        }
        let start = x as usize * BGR24_BPP;
        let len = width as usize * BGR24_BPP;
        let mut data = Vec::with_capacity(len * self.height as usize);
        for y in 0..self.height {
            data.extend_from_slice(&self.row(y)[start..start + len]);
        }
        Self::new(data, width, self.height)
    }

    /// Places `left` and `right` side by side. Both must share a height.
    pub fn side_by_side(left: &VideoFrame, right: &VideoFrame) -> anyhow::Result<Self> {
        if left.height != right.height {
            anyhow::bail!(
                "stereo views differ in height: {} vs {}",
                left.height,
                right.height
            );
        }
        let width = left.width + right.width;
        let mut data = Vec::with_capacity(Self::byte_len(width, left.height));
        for y in 0..left.height {
            data.extend_from_slice(left.row(y));
            data.extend_from_slice(right.row(y));
        }
        Self::new(data, width, left.height)
    }

    /// Builds an ffmpeg frame holding this picture, honoring the frame's line stride.
    pub fn to_av_frame(&self) -> ffmpeg_next::frame::Video {
        let mut frame = ffmpeg_next::frame::Video::new(Pixel::BGR24, self.width, self.height);
        let dst_stride = frame.stride(0);
        let src_stride = self.stride();
        let plane = frame.data_mut(0);
        for y in 0..self.height as usize {
            let dst = &mut plane[y * dst_stride..y * dst_stride + src_stride];
            dst.copy_from_slice(&self.data[y * src_stride..(y + 1) * src_stride]);
        }
        frame
    }

    /// Packs a BGR24 ffmpeg frame, dropping its line padding.
    pub fn from_av_frame(frame: &ffmpeg_next::frame::Video) -> anyhow::Result<Self> {
        if frame.format() != Pixel::BGR24 {
            anyhow::bail!("expected bgr24 frame, got {:?}", frame.format());
        }
        let width = frame.width();
        let height = frame.height();
        let src_stride = frame.stride(0);
        let row_len = width as usize * BGR24_BPP;
        let plane = frame.data(0);
        let mut data = Vec::with_capacity(Self::byte_len(width, height));
        for y in 0..height as usize {
            data.extend_from_slice(&plane[y * src_stride..y * src_stride + row_len]);
        }
        Self::new(data, width, height)
    }
}

impl Display for VideoFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "VideoFrame data_len: {}, width: {}, height: {}",
            self.data.len(),
            self.width,
            self.height
        )
    }
}
