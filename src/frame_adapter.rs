//! Camera buffer to upright image conversion.
//!
//! Camera HALs hand out rows padded to a hardware alignment, and the sensor
//! is mounted at an angle to the display. Both are undone here so that the
//! landmarks coming back from the engine line up with the preview.

use image::{imageops, RgbaImage};

use crate::error::FrameError;
use crate::types::{Frame, UprightImage};

const BYTES_PER_PIXEL: usize = 4;

/// Strips row padding, crops to `width`x`height` and rotates clockwise by
/// `rotation_degrees`. The source buffer is only read.
pub fn convert(
    buffer: &[u8],
    row_stride: usize,
    pixel_stride: usize,
    width: u32,
    height: u32,
    rotation_degrees: i32,
) -> Result<UprightImage, FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::Empty { width, height });
    }
    if pixel_stride != BYTES_PER_PIXEL {
        return Err(FrameError::PixelStride(pixel_stride));
    }
    let rotation = normalize_rotation(rotation_degrees)?;

    // Padded width in pixels; everything past `width` is alignment slack.
    let row_pixels = row_stride / pixel_stride;
    if row_pixels < width as usize {
        return Err(FrameError::RowStride {
            row_stride,
            pixel_stride,
            width,
        });
    }

    // The last row may legitimately stop right after its visible pixels.
    let required = row_stride
        .checked_mul(height as usize - 1)
        .and_then(|rows| rows.checked_add(pixel_stride * width as usize))
        .ok_or(FrameError::LayoutOverflow { row_stride, height })?;
    if buffer.len() < required {
        return Err(FrameError::BufferTooSmall {
            required,
            actual: buffer.len(),
        });
    }

    let row_bytes = width as usize * BYTES_PER_PIXEL;
    let mut dense = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * row_stride;
        dense.extend_from_slice(&buffer[start..start + row_bytes]);
    }

    let cropped = RgbaImage::from_raw(width, height, dense).ok_or(FrameError::BufferTooSmall {
        required: row_bytes * height as usize,
        actual: buffer.len(),
    })?;

    Ok(rotate_upright(cropped, rotation))
}

/// Converts a captured frame using its own layout metadata.
pub fn convert_frame(frame: &Frame) -> Result<UprightImage, FrameError> {
    convert(
        &frame.data,
        frame.row_stride,
        frame.pixel_stride,
        frame.width,
        frame.height,
        frame.rotation_degrees,
    )
}

/// Clockwise rotation by a multiple of 90 degrees.
pub fn rotate_upright(image: RgbaImage, rotation_degrees: i32) -> RgbaImage {
    match rotation_degrees.rem_euclid(360) {
        90 => imageops::rotate90(&image),
        180 => imageops::rotate180(&image),
        270 => imageops::rotate270(&image),
        _ => image,
    }
}

fn normalize_rotation(rotation_degrees: i32) -> Result<i32, FrameError> {
    if rotation_degrees % 90 != 0 {
        return Err(FrameError::Rotation(rotation_degrees));
    }
    Ok(rotation_degrees.rem_euclid(360))
}
