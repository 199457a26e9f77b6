//! Decoded frames and classifier input tensors.
//!
//! - `Frame`: one decoded RGB24 frame as produced by a capture session.
//! - `ModelInput`: the frame resized to the classifier's fixed input shape
//!   and scaled to `f32` in [0,1], NHWC layout.
//!
//! Frames are owned by the worker that read them and dropped after
//! classification; nothing here is shared across sources.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::time::Instant;

use crate::ingest::normalize;

/// Channel order the classifier was trained on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    /// OpenCV-decoded training data.
    #[default]
    Bgr,
    Rgb,
}

impl std::str::FromStr for ChannelOrder {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bgr" => Ok(ChannelOrder::Bgr),
            "rgb" => Ok(ChannelOrder::Rgb),
            other => Err(anyhow!("unknown channel order '{}'", other)),
        }
    }
}

/// Fixed input shape of a classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputShape {
    pub width: u32,
    pub height: u32,
    pub channel_order: ChannelOrder,
}

impl Default for InputShape {
    fn default() -> Self {
        Self {
            width: 128,
            height: 128,
            channel_order: ChannelOrder::Bgr,
        }
    }
}

/// One decoded RGB24 frame.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    captured_at: Instant,
}

impl Frame {
    /// Wrap RGB24 pixels. The buffer length must be `width * height * 3`.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = normalize::rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at: Instant::now(),
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Resize and normalize for a classifier with the given input shape.
    pub fn to_model_input(&self, shape: InputShape) -> Result<ModelInput> {
        let resized = normalize::resize_rgb(
            &self.pixels,
            self.width,
            self.height,
            shape.width,
            shape.height,
        )?;
        let data = normalize::to_unit_floats(&resized, shape.channel_order);
        Ok(ModelInput {
            data,
            width: shape.width,
            height: shape.height,
        })
    }
}

/// Normalized classifier input, NHWC with batch size 1 and 3 channels.
#[derive(Clone, Debug)]
pub struct ModelInput {
    data: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

impl ModelInput {
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Mean of all values; cheap brightness summary used by the stub classifier.
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.data.iter().map(|v| *v as f64).sum();
        (sum / self.data.len() as f64) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_wrong_length() {
        assert!(Frame::new(vec![0u8; 10], 2, 2).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2).is_ok());
    }

    #[test]
    fn model_input_has_fixed_shape_and_unit_range() -> Result<()> {
        let frame = Frame::new(vec![255u8; 64 * 48 * 3], 64, 48)?;
        let input = frame.to_model_input(InputShape::default())?;
        assert_eq!(input.width, 128);
        assert_eq!(input.height, 128);
        assert_eq!(input.as_slice().len(), 128 * 128 * 3);
        assert!(input.as_slice().iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!((input.mean() - 1.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn channel_order_parses() -> Result<()> {
        assert_eq!("BGR".parse::<ChannelOrder>()?, ChannelOrder::Bgr);
        assert_eq!("rgb".parse::<ChannelOrder>()?, ChannelOrder::Rgb);
        assert!("yuv".parse::<ChannelOrder>().is_err());
        Ok(())
    }
}
