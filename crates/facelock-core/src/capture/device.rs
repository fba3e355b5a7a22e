use std::fmt;
use std::path::{Path, PathBuf};

use image::GrayImage;
use tracing::debug;

use crate::errors::{AppError, AppResult};

/// A single grayscale frame as delivered by a [`FrameStream`].
pub type Frame = GrayImage;

/// Where frames come from: a V4L2 index, a device node, or a still image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceLocator {
    Index(u32),
    Path(PathBuf),
}

impl DeviceLocator {
    pub fn parse(text: &str) -> Self {
        match text.parse::<u32>() {
            Ok(index) => DeviceLocator::Index(index),
            Err(_) => DeviceLocator::Path(PathBuf::from(text)),
        }
    }

    /// True when the locator names a regular file rather than a device node.
    pub fn is_still_image(&self) -> bool {
        match self {
            DeviceLocator::Index(_) => false,
            DeviceLocator::Path(path) => path.is_file(),
        }
    }
}

impl fmt::Display for DeviceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceLocator::Index(index) => write!(f, "/dev/video{index}"),
            DeviceLocator::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// An open device. Dropping the stream releases the device.
pub trait FrameStream: Send {
    fn read_frame(&mut self) -> AppResult<Frame>;
}

/// Opens [`FrameStream`]s. Implementations must be shareable with worker threads.
pub trait FrameSource: Send + Sync {
    fn open(&self, device: &DeviceLocator) -> AppResult<Box<dyn FrameStream>>;
}

/// Treats an image file as a camera that always shows the same picture.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFileSource;

impl ImageFileSource {
    pub fn load(path: &Path) -> AppResult<Frame> {
        if !path.is_file() {
            return Err(AppError::MissingInput {
                path: path.to_path_buf(),
            });
        }
        let image = image::open(path).map_err(|source| AppError::ImageDecode {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(image.to_luma8())
    }
}

impl FrameSource for ImageFileSource {
    fn open(&self, device: &DeviceLocator) -> AppResult<Box<dyn FrameStream>> {
        match device {
            DeviceLocator::Path(path) => {
                let frame = Self::load(path)?;
                debug!(device = %device, width = frame.width(), height = frame.height(), "loaded still image");
                Ok(Box::new(StillImageStream { frame }))
            }
            DeviceLocator::Index(_) => Err(AppError::DeviceUnavailable {
                device: device.to_string(),
                message: "not an image file".into(),
            }),
        }
    }
}

struct StillImageStream {
    frame: Frame,
}

impl FrameStream for StillImageStream {
    fn read_frame(&mut self) -> AppResult<Frame> {
        Ok(self.frame.clone())
    }
}

/// Picks a still-image source for regular files and a V4L2 source otherwise.
#[derive(Debug, Clone)]
pub struct SystemFrameSource {
    pixel_format: String,
}

impl SystemFrameSource {
    pub fn new(pixel_format: impl Into<String>) -> Self {
        Self {
            pixel_format: pixel_format.into(),
        }
    }
}

impl FrameSource for SystemFrameSource {
    fn open(&self, device: &DeviceLocator) -> AppResult<Box<dyn FrameStream>> {
        if device.is_still_image() {
            return ImageFileSource.open(device);
        }
        open_camera(&self.pixel_format, device)
    }
}

#[cfg(feature = "v4l")]
fn open_camera(pixel_format: &str, device: &DeviceLocator) -> AppResult<Box<dyn FrameStream>> {
    super::v4l::V4lFrameSource::new(pixel_format).open(device)
}

#[cfg(not(feature = "v4l"))]
fn open_camera(_pixel_format: &str, device: &DeviceLocator) -> AppResult<Box<dyn FrameStream>> {
    Err(AppError::DeviceUnavailable {
        device: device.to_string(),
        message: "built without V4L2 support; rebuild with the `v4l` feature or pass an image file"
            .into(),
    })
}
