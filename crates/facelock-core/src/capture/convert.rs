use image::GrayImage;

use crate::errors::{AppError, AppResult};

/// Pixel formats the capture path knows how to reduce to 8-bit grayscale.
pub const SUPPORTED_PIXEL_FORMATS: &[&str] = &["Y16", "GREY", "Y08", "YUYV"];

/// Convert one raw frame into a grayscale image.
///
/// `Y16` keeps the high byte of each little-endian sample, `GREY`/`Y08` are
/// copied through, and `YUYV` keeps the two luma bytes of each macro-pixel.
pub fn convert_frame_to_image(
    data: &[u8],
    width: u32,
    height: u32,
    pixel_format: &str,
) -> AppResult<GrayImage> {
    let expected_pixels = width as usize * height as usize;

    let buffer = match pixel_format {
        "Y16" => {
            let expected_bytes = expected_pixels * 2;
            if data.len() < expected_bytes {
                return Err(short_frame(pixel_format, expected_bytes, data.len()));
            }
            data[..expected_bytes]
                .chunks_exact(2)
                .map(|sample| u16::from_le_bytes([sample[0], sample[1]]))
                .map(|value| (value >> 8) as u8)
                .collect()
        }
        "GREY" | "Y08" => {
            if data.len() < expected_pixels {
                return Err(short_frame(pixel_format, expected_pixels, data.len()));
            }
            data[..expected_pixels].to_vec()
        }
        "YUYV" => {
            let expected_bytes = expected_pixels * 2;
            if data.len() < expected_bytes {
                return Err(short_frame(pixel_format, expected_bytes, data.len()));
            }
            let mut chunks = data[..expected_bytes].chunks_exact(4);
            let mut luma = Vec::with_capacity(expected_pixels);
            for chunk in &mut chunks {
                luma.push(chunk[0]);
                if luma.len() == expected_pixels {
                    break;
                }
                luma.push(chunk[2]);
            }
            if luma.len() < expected_pixels {
                return Err(AppError::FrameProcessing(
                    "incomplete YUYV macro-pixel encountered".into(),
                ));
            }
            luma
        }
        other => {
            return Err(AppError::FrameProcessing(format!(
                "unsupported conversion from pixel format {other}"
            )))
        }
    };

    GrayImage::from_vec(width, height, buffer)
        .ok_or_else(|| AppError::FrameProcessing("failed to build image buffer".into()))
}

fn short_frame(pixel_format: &str, expected: usize, actual: usize) -> AppError {
    AppError::FrameProcessing(format!(
        "expected {expected} bytes for {pixel_format} frame, got {actual}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn y16_keeps_high_byte() {
        let data: Vec<u8> = vec![0, 0, 0, 0, 255, 255, 255, 255];
        let image = convert_frame_to_image(&data, 2, 2, "Y16").expect("convert y16");
        assert_eq!(image.width(), 2);
        assert_eq!(image.height(), 2);
        assert_eq!(image.as_raw(), &vec![0, 0, 255, 255]);
    }

    #[test]
    fn grey_is_copied_through() {
        let data: Vec<u8> = vec![10, 20, 30, 40];
        let image = convert_frame_to_image(&data, 2, 2, "GREY").expect("convert grey");
        assert_eq!(image.as_raw(), &data);
    }

    #[test]
    fn yuyv_keeps_luma_bytes() {
        let data: Vec<u8> = vec![10, 128, 20, 128, 30, 64, 40, 64];
        let image = convert_frame_to_image(&data, 2, 2, "YUYV").expect("convert yuyv");
        assert_eq!(image.as_raw(), &vec![10, 20, 30, 40]);
    }

    #[test]
    fn short_frames_are_rejected() {
        let err = convert_frame_to_image(&[1, 2, 3], 2, 2, "GREY").unwrap_err();
        assert!(matches!(err, AppError::FrameProcessing(message) if message.contains("expected 4")));
    }

    #[test]
    fn unknown_formats_are_rejected() {
        let err = convert_frame_to_image(&[0; 16], 2, 2, "MJPG").unwrap_err();
        assert!(matches!(err, AppError::FrameProcessing(_)));
    }
}
