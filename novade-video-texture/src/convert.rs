//! Expansion of capture pixel layouts to the RGBA8 layout of the texture.

use crate::error::{RendererError, Result};
use crate::source::{FrameFormat, PixelFormat};

/// Converts one frame of `format` from `src` into RGBA8 in `dst`.
///
/// `src` must be exactly `format.frame_size()` bytes and `dst` exactly
/// `format.rgba_size()` bytes.
pub fn to_rgba(format: &FrameFormat, src: &[u8], dst: &mut [u8]) -> Result<()> {
    if src.len() != format.frame_size() {
        return Err(RendererError::FrameSizeMismatch {
            expected: format.frame_size(),
            actual: src.len(),
        });
    }
    if dst.len() != format.rgba_size() {
        return Err(RendererError::FrameSizeMismatch {
            expected: format.rgba_size(),
            actual: dst.len(),
        });
    }

    match format.pixel_format {
        PixelFormat::Rgba => dst.copy_from_slice(src),
        PixelFormat::Rgb24 => rgb24_to_rgba(src, dst),
        PixelFormat::Yuyv => yuyv_to_rgba(src, dst),
    }
    Ok(())
}

fn rgb24_to_rgba(src: &[u8], dst: &mut [u8]) {
    for (rgb, rgba) in src.chunks_exact(3).zip(dst.chunks_exact_mut(4)) {
        rgba[..3].copy_from_slice(rgb);
        rgba[3] = u8::MAX;
    }
}

#[inline]
fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// BT.601 limited range, fixed point.
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 298 * (i32::from(y) - 16);
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    [
        clamp_u8((c + 409 * e + 128) >> 8),
        clamp_u8((c - 100 * d - 208 * e + 128) >> 8),
        clamp_u8((c + 516 * d + 128) >> 8),
    ]
}

fn yuyv_to_rgba(src: &[u8], dst: &mut [u8]) {
    for (yuyv, pair) in src.chunks_exact(4).zip(dst.chunks_exact_mut(8)) {
        let (y0, u, y1, v) = (yuyv[0], yuyv[1], yuyv[2], yuyv[3]);
        let [r, g, b] = yuv_to_rgb(y0, u, v);
        pair[..4].copy_from_slice(&[r, g, b, u8::MAX]);
        let [r, g, b] = yuv_to_rgb(y1, u, v);
        pair[4..].copy_from_slice(&[r, g, b, u8::MAX]);
    }
}
