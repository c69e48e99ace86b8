use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    capture::{CameraCapture, CaptureSpec},
    error::SourceError,
    frame::VideoFrame,
    stereo::{SideBySideRig, StereoRig, StereoSource, StereoView},
};

/// Anything the worker can pull frames from.
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is exhausted or a grab failed.
    fn next_frame(&mut self) -> Option<VideoFrame>;
}

pub type BoxedFrameSource = Box<dyn FrameSource>;

/// Which source variant the next session opens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceSelector {
    /// Local camera by index (`/dev/video<index>` through v4l2 on linux).
    Camera { index: u32 },
    /// Any ffmpeg readable input: a file, a network url or a device path.
    Url {
        url: String,
        format: Option<String>,
    },
    StereoLeft,
    StereoRight,
    StereoComposite,
    /// Frames pushed by the caller, see `StreamController::send_frame_manually`.
    Manual,
}

impl Default for DeviceSelector {
    fn default() -> Self {
        DeviceSelector::Camera { index: 0 }
    }
}

impl DeviceSelector {
    pub fn stereo_view(&self) -> Option<StereoView> {
        match self {
            DeviceSelector::StereoLeft => Some(StereoView::Left),
            DeviceSelector::StereoRight => Some(StereoView::Right),
            DeviceSelector::StereoComposite => Some(StereoView::Composite),
            _ => None,
        }
    }
}

impl Display for DeviceSelector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceSelector::Camera { index } => write!(f, "camera://{}", index),
            DeviceSelector::Url { url, format } => match format {
                Some(format) => write!(f, "{} ({})", url, format),
                None => write!(f, "{}", url),
            },
            DeviceSelector::StereoLeft => write!(f, "stereo://left"),
            DeviceSelector::StereoRight => write!(f, "stereo://right"),
            DeviceSelector::StereoComposite => write!(f, "stereo://composite"),
            DeviceSelector::Manual => write!(f, "manual://"),
        }
    }
}

/// Opens a [`FrameSource`] for a selector. The controller calls this once per session.
///
/// [`DeviceSelector::Manual`] never reaches a provider; the controller owns that feed.
pub trait DeviceProvider: Send + Sync {
    fn open(&self, selector: &DeviceSelector) -> Result<BoxedFrameSource, SourceError>;
}

type RigFactory = dyn Fn() -> anyhow::Result<Box<dyn StereoRig>> + Send + Sync;

/// Opens real capture devices.
pub struct SystemDevices {
    stereo: Option<Arc<RigFactory>>,
}

impl SystemDevices {
    pub fn new() -> Self {
        Self { stereo: None }
    }

    /// Attaches a stereo camera that delivers both eyes side by side in one picture.
    pub fn with_side_by_side_stereo(self, spec: CaptureSpec) -> Self {
        self.with_stereo_rig(move || {
            let capture = CameraCapture::open(&spec)?;
            Ok(Box::new(SideBySideRig::new(capture)) as Box<dyn StereoRig>)
        })
    }

    pub fn with_stereo_rig<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn StereoRig>> + Send + Sync + 'static,
    {
        self.stereo = Some(Arc::new(factory));
        self
    }
}

impl Default for SystemDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for SystemDevices {
    fn open(&self, selector: &DeviceSelector) -> Result<BoxedFrameSource, SourceError> {
        match selector {
            DeviceSelector::Camera { index } => {
                let spec = CaptureSpec::camera(*index);
                let capture = CameraCapture::open(&spec).map_err(|e| SourceError::Open {
                    url: spec.url.clone(),
                    reason: e,
                })?;
                Ok(Box::new(capture))
            }
            DeviceSelector::Url { url, format } => {
                let spec = CaptureSpec {
                    url: url.clone(),
                    format: format.clone(),
                };
                let capture = CameraCapture::open(&spec).map_err(|e| SourceError::Open {
                    url: spec.url.clone(),
                    reason: e,
                })?;
                Ok(Box::new(capture))
            }
            DeviceSelector::StereoLeft
            | DeviceSelector::StereoRight
            | DeviceSelector::StereoComposite => {
                let factory = self.stereo.as_ref().ok_or(SourceError::NoStereoDevice)?;
                let rig = factory().map_err(|e| SourceError::Open {
                    url: selector.to_string(),
                    reason: e,
                })?;
                let view = selector.stereo_view().ok_or(SourceError::NoStereoDevice)?;
                Ok(Box::new(StereoSource::new(rig, view)))
            }
            DeviceSelector::Manual => Err(SourceError::NoManualFeed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stereo::StereoPair;

    struct OneShotRig(Option<StereoPair>);

    impl StereoRig for OneShotRig {
        fn grab(&mut self) -> Option<StereoPair> {
            self.0.take()
        }
    }

    #[test]
    fn test_stereo_without_rig_is_not_opened() {
        let devices = SystemDevices::new();
        for selector in [
            DeviceSelector::StereoLeft,
            DeviceSelector::StereoRight,
            DeviceSelector::StereoComposite,
        ] {
            match devices.open(&selector) {
                Err(e) => assert_eq!(e.code(), crate::error::ErrorCode::SourceNotOpened),
                Ok(_) => panic!("expected stereo open to fail for {}", selector),
            }
        }
    }

    #[test]
    fn test_stereo_with_rig() {
        let devices = SystemDevices::new().with_stereo_rig(|| {
            Ok(Box::new(OneShotRig(Some(StereoPair {
                left: VideoFrame::filled(2, 2, [1, 1, 1]),
                right: VideoFrame::filled(2, 2, [2, 2, 2]),
            }))) as Box<dyn StereoRig>)
        });
        let mut source = devices
            .open(&DeviceSelector::StereoRight)
            .unwrap_or_else(|e| panic!("open failed: {}", e));
        let frame = source.next_frame().expect("one frame");
        assert_eq!(frame.pixel(0, 0), [2, 2, 2]);
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn test_manual_is_not_a_device() {
        assert!(SystemDevices::new().open(&DeviceSelector::Manual).is_err());
    }

    #[test]
    fn test_selector_serde() -> anyhow::Result<()> {
        let selector: DeviceSelector = serde_json::from_str(r#"{"type":"stereo_composite"}"#)?;
        assert_eq!(selector, DeviceSelector::StereoComposite);
        let selector: DeviceSelector =
            serde_json::from_str(r#"{"type":"url","url":"test.mp4","format":null}"#)?;
        assert_eq!(selector.to_string(), "test.mp4");
        assert_eq!(DeviceSelector::default().to_string(), "camera://0");
        Ok(())
    }
}
