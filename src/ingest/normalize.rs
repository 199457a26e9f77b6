use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::frame::ChannelOrder;

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(3))
        .map(|v| v as usize)
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}

/// Bilinear resize of an RGB24 buffer. Returns the input unchanged when the
/// size already matches.
pub(crate) fn resize_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    target_width: u32,
    target_height: u32,
) -> Result<Vec<u8>> {
    if target_width == 0 || target_height == 0 {
        return Err(anyhow!("target size must be non-zero"));
    }
    if width == target_width && height == target_height {
        return Ok(pixels.to_vec());
    }
    let image = RgbImage::from_raw(width, height, pixels.to_vec()).ok_or_else(|| {
        anyhow!(
            "RGB frame length mismatch: expected {}x{}x3, got {}",
            width,
            height,
            pixels.len()
        )
    })?;
    let resized = imageops::resize(&image, target_width, target_height, FilterType::Triangle);
    Ok(resized.into_raw())
}

/// Scale bytes to [0,1], reordering channels when the model expects BGR.
pub(crate) fn to_unit_floats(rgb: &[u8], order: ChannelOrder) -> Vec<f32> {
    let mut out = Vec::with_capacity(rgb.len());
    for px in rgb.chunks_exact(3) {
        let (a, b, c) = match order {
            ChannelOrder::Rgb => (px[0], px[1], px[2]),
            ChannelOrder::Bgr => (px[2], px[1], px[0]),
        };
        out.push(a as f32 / 255.0);
        out.push(b as f32 / 255.0);
        out.push(c as f32 / 255.0);
    }
    out
}
