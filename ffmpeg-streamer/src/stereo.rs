use crate::{capture::CameraCapture, frame::VideoFrame, source::FrameSource};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StereoPair {
    pub left: VideoFrame,
    pub right: VideoFrame,
}

/// A depth capable camera that grabs both eyes at once.
pub trait StereoRig: Send {
    /// `None` when the grab failed or the device is gone.
    fn grab(&mut self) -> Option<StereoPair>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StereoView {
    Left,
    Right,
    /// Left eye in the left half, right eye in the right half.
    Composite,
}

pub struct StereoSource {
    rig: Box<dyn StereoRig>,
    view: StereoView,
}

impl StereoSource {
    pub fn new(rig: Box<dyn StereoRig>, view: StereoView) -> Self {
        Self { rig, view }
    }
}

impl FrameSource for StereoSource {
    fn next_frame(&mut self) -> Option<VideoFrame> {
        let pair = self.rig.grab()?;
        match self.view {
            StereoView::Left => Some(pair.left),
            StereoView::Right => Some(pair.right),
            StereoView::Composite => match VideoFrame::side_by_side(&pair.left, &pair.right) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    log::error!("stereo composite failed: {:#}", e);
                    None
                }
            },
        }
        .filter(|frame| !frame.is_empty())
    }
}

/// UVC stereo cameras deliver both eyes as one side-by-side picture.
pub struct SideBySideRig {
    capture: CameraCapture,
}

impl SideBySideRig {
    pub fn new(capture: CameraCapture) -> Self {
        Self { capture }
    }
}

impl StereoRig for SideBySideRig {
    fn grab(&mut self) -> Option<StereoPair> {
        let frame = self.capture.next_frame()?;
        let eye_width = frame.width() / 2;
        let split = frame
            .crop_columns(0, eye_width)
            .and_then(|left| Ok((left, frame.crop_columns(eye_width, eye_width)?)));
        match split {
            Ok((left, right)) => Some(StereoPair { left, right }),
            Err(e) => {
                log::error!("stereo split failed: {:#}", e);
                None
            }
        }
    }
}
