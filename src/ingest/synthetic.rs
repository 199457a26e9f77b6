//! Synthetic capture for `stub://` URLs.
//!
//! Query options shape the stream so failure paths can be exercised without
//! a camera:
//! - `frames=N`: end of stream after N frames per session
//! - `fail_opens=N`: the first N opens of this URL fail
//! - `width=W`, `height=H`: frame size (default 320x240)
//! - `level=L`: fixed pixel value instead of the moving pattern
//!
//! Open counts are tracked per URL for the life of the process.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock, PoisonError};

use url::Url;

use super::{CaptureError, CaptureSession};
use crate::frame::Frame;

const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 240;

#[derive(Clone, Debug, PartialEq, Eq)]
struct SyntheticOptions {
    frames: Option<u64>,
    fail_opens: u64,
    width: u32,
    height: u32,
    level: Option<u8>,
}

impl SyntheticOptions {
    fn parse(url: &str) -> Result<Self, CaptureError> {
        let parsed = Url::parse(url).map_err(|e| CaptureError::Open {
            url: url.to_string(),
            detail: e.to_string(),
        })?;
        let mut opts = SyntheticOptions {
            frames: None,
            fail_opens: 0,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            level: None,
        };
        for (key, value) in parsed.query_pairs() {
            let bad = || CaptureError::Open {
                url: url.to_string(),
                detail: format!("invalid stub option {}={}", key, value),
            };
            match key.as_ref() {
                "frames" => opts.frames = Some(value.parse().map_err(|_| bad())?),
                "fail_opens" => opts.fail_opens = value.parse().map_err(|_| bad())?,
                "width" => opts.width = value.parse().map_err(|_| bad())?,
                "height" => opts.height = value.parse().map_err(|_| bad())?,
                "level" => opts.level = Some(value.parse().map_err(|_| bad())?),
                _ => return Err(bad()),
            }
        }
        if opts.width == 0 || opts.height == 0 {
            return Err(CaptureError::Open {
                url: url.to_string(),
                detail: "stub frame size must be non-zero".to_string(),
            });
        }
        Ok(opts)
    }
}

fn open_counts() -> &'static Mutex<HashMap<String, u64>> {
    static OPENS: OnceLock<Mutex<HashMap<String, u64>>> = OnceLock::new();
    OPENS.get_or_init(|| Mutex::new(HashMap::new()))
}

pub struct SyntheticCapture {
    url: String,
    opts: SyntheticOptions,
    frame_count: u64,
}

impl SyntheticCapture {
    pub fn open(url: &str) -> Result<Self, CaptureError> {
        let opts = SyntheticOptions::parse(url)?;
        let attempt = {
            let mut counts = open_counts()
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let count = counts.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if attempt <= opts.fail_opens {
            return Err(CaptureError::Open {
                url: url.to_string(),
                detail: format!("synthetic open failure {}/{}", attempt, opts.fail_opens),
            });
        }
        log::info!("SyntheticCapture: opened {}", url);
        Ok(Self {
            url: url.to_string(),
            opts,
            frame_count: 0,
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let len = (self.opts.width * self.opts.height * 3) as usize;
        if let Some(level) = self.opts.level {
            return vec![level; len];
        }
        let mut pixels = vec![0u8; len];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8;
        }
        pixels
    }
}

impl CaptureSession for SyntheticCapture {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if let Some(limit) = self.opts.frames {
            if self.frame_count >= limit {
                return Err(CaptureError::EndOfStream);
            }
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::new(pixels, self.opts.width, self.opts.height)
            .map_err(|e| CaptureError::Decode(format!("{}: {}", self.url, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_frames_of_requested_size() -> Result<(), CaptureError> {
        let mut capture = SyntheticCapture::open("stub://size-test?width=16&height=8")?;
        let frame = capture.read_frame()?;
        assert_eq!(frame.width, 16);
        assert_eq!(frame.height, 8);
        assert_eq!(capture.frames_captured(), 1);
        Ok(())
    }

    #[test]
    fn ends_after_frame_limit() -> Result<(), CaptureError> {
        let mut capture = SyntheticCapture::open("stub://limit-test?frames=2&width=4&height=4")?;
        capture.read_frame()?;
        capture.read_frame()?;
        assert!(matches!(capture.read_frame(), Err(CaptureError::EndOfStream)));
        Ok(())
    }

    #[test]
    fn fails_first_opens_then_succeeds() {
        let url = "stub://fail-open-test?fail_opens=2&width=4&height=4";
        assert!(SyntheticCapture::open(url).is_err());
        assert!(SyntheticCapture::open(url).is_err());
        assert!(SyntheticCapture::open(url).is_ok());
    }

    #[test]
    fn fixed_level_fills_every_pixel() -> Result<(), CaptureError> {
        let mut capture = SyntheticCapture::open("stub://level-test?level=200&width=4&height=4")?;
        let frame = capture.read_frame()?;
        assert!(frame.pixels().iter().all(|p| *p == 200));
        Ok(())
    }

    #[test]
    fn rejects_unknown_options() {
        assert!(SyntheticCapture::open("stub://bad?colour=red").is_err());
        assert!(SyntheticCapture::open("stub://bad?frames=lots").is_err());
        assert!(SyntheticCapture::open("stub://bad?width=0").is_err());
    }
}
