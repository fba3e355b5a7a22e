use tracing::debug;
use v4l::buffer::Type;
use v4l::capability::{Capabilities, Flags as CapabilityFlags};
use v4l::format::{Format, FourCC};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;

use super::convert::{convert_frame_to_image, SUPPORTED_PIXEL_FORMATS};
use super::device::{DeviceLocator, Frame, FrameSource, FrameStream};
use crate::errors::{AppError, AppResult};

const STREAM_BUFFERS: u32 = 4;

/// Live V4L2 capture negotiated to a grayscale-convertible pixel format.
#[derive(Debug, Clone)]
pub struct V4lFrameSource {
    pixel_format: String,
}

impl V4lFrameSource {
    pub fn new(pixel_format: impl Into<String>) -> Self {
        Self {
            pixel_format: pixel_format.into(),
        }
    }
}

impl FrameSource for V4lFrameSource {
    fn open(&self, locator: &DeviceLocator) -> AppResult<Box<dyn FrameStream>> {
        let unavailable = |message: String| AppError::DeviceUnavailable {
            device: locator.to_string(),
            message,
        };

        let device = match locator {
            DeviceLocator::Index(index) => v4l::Device::new(*index as usize),
            DeviceLocator::Path(path) => v4l::Device::with_path(path),
        }
        .map_err(|err| unavailable(err.to_string()))?;

        let caps = device.query_caps().map_err(|err| unavailable(err.to_string()))?;
        ensure_capabilities(&caps)?;

        if !SUPPORTED_PIXEL_FORMATS.contains(&self.pixel_format.as_str()) {
            return Err(AppError::UnsupportedFormat(self.pixel_format.clone()));
        }
        let requested = parse_fourcc(&self.pixel_format)
            .ok_or_else(|| AppError::UnsupportedFormat(self.pixel_format.clone()))?;
        let formats = device.enum_formats()?;
        if !formats.iter().any(|format| format.fourcc == requested) {
            return Err(AppError::UnsupportedFormat(self.pixel_format.clone()));
        }

        let mut format = device.format()?;
        format.fourcc = requested;
        let format = device.set_format(&format)?;
        debug!(
            device = %locator,
            driver = %caps.driver,
            pixel_format = %fourcc_to_string(format.fourcc),
            width = format.width,
            height = format.height,
            "negotiated capture format"
        );

        let stream = Stream::with_buffers(&device, Type::VideoCapture, STREAM_BUFFERS)
            .map_err(|err| unavailable(err.to_string()))?;

        Ok(Box::new(V4lStream {
            stream,
            format,
            _device: device,
        }))
    }
}

struct V4lStream {
    // Dropped before the device handle.
    stream: Stream<'static>,
    format: Format,
    _device: v4l::Device,
}

impl FrameStream for V4lStream {
    fn read_frame(&mut self) -> AppResult<Frame> {
        let (data, _) = self.stream.next()?;
        convert_frame_to_image(
            data,
            self.format.width,
            self.format.height,
            &fourcc_to_string(self.format.fourcc),
        )
    }
}

fn ensure_capabilities(caps: &Capabilities) -> AppResult<()> {
    let flags = caps.capabilities;
    let mut reasons = Vec::new();
    if !flags.contains(CapabilityFlags::VIDEO_CAPTURE) {
        reasons.push("missing VIDEO_CAPTURE");
    }
    if !flags.contains(CapabilityFlags::STREAMING) {
        reasons.push("missing STREAMING");
    }
    if reasons.is_empty() {
        Ok(())
    } else {
        Err(AppError::Capability(reasons.join(", ")))
    }
}

fn parse_fourcc(code: &str) -> Option<FourCC> {
    if code.is_empty() || code.len() > 4 {
        return None;
    }
    let mut repr = [b' '; 4];
    repr[..code.len()].copy_from_slice(code.as_bytes());
    Some(FourCC::new(&repr))
}

fn fourcc_to_string(fourcc: FourCC) -> String {
    String::from_utf8_lossy(&fourcc.repr)
        .trim_matches(|c| c == char::from(0) || c == ' ')
        .to_string()
}
