//! GStreamer capture for HLS, RTSP, HTTP and file URIs.
//!
//! Pipeline: `uridecodebin ! videoconvert ! video/x-raw,format=RGB ! appsink`.
//! The appsink keeps only the newest buffer, so a slow classifier never
//! builds up a backlog of stale frames.

use std::time::{Duration, Instant};

use gstreamer::prelude::*;

use super::{CaptureError, CaptureSession};
use crate::frame::Frame;

/// How long a read may block before the session counts as stalled.
const FRAME_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct GstreamerCapture {
    url: String,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    opened_at: Instant,
}

impl GstreamerCapture {
    pub(crate) fn open(url: &str) -> Result<Self, CaptureError> {
        let open_err = |detail: String| CaptureError::Open {
            url: url.to_string(),
            detail,
        };
        gstreamer::init().map_err(|e| open_err(format!("initialize gstreamer: {}", e)))?;

        let uri = super::capture_uri(url)?;
        let description = format!(
            "uridecodebin uri=\"{}\" ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            uri
        );
        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| open_err(format!("build pipeline: {}", e)))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| open_err("capture pipeline is not a Pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| open_err("appsink element missing from pipeline".to_string()))?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| open_err("appsink element has unexpected type".to_string()))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| open_err(format!("set pipeline to Playing: {}", e)))?;
        log::info!("GstreamerCapture: opened {}", url);

        Ok(Self {
            url: url.to_string(),
            pipeline,
            appsink,
            frame_count: 0,
            opened_at: Instant::now(),
        })
    }

    /// Drain the bus and turn the first error or EOS into a capture error.
    fn poll_bus(&self) -> Result<(), CaptureError> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(CaptureError::Decode(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    )));
                }
                MessageView::Eos(..) => return Err(CaptureError::EndOfStream),
                _ => {}
            }
        }
        Ok(())
    }
}

impl CaptureSession for GstreamerCapture {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        self.poll_bus()?;

        let timeout = gstreamer::ClockTime::from_mseconds(FRAME_TIMEOUT.as_millis() as u64);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            if self.appsink.is_eos() {
                return Err(CaptureError::EndOfStream);
            }
            self.poll_bus()?;
            return Err(CaptureError::Stalled(FRAME_TIMEOUT.as_millis() as u64));
        };

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.frame_count += 1;
        if self.frame_count == 1 {
            log::debug!(
                "GstreamerCapture: first frame from {} after {:?} ({}x{})",
                self.url,
                self.opened_at.elapsed(),
                width,
                height
            );
        }
        Frame::new(pixels, width, height).map_err(|e| CaptureError::Decode(e.to_string()))
    }
}

impl Drop for GstreamerCapture {
    fn drop(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("GstreamerCapture: failed to stop {}: {}", self.url, err);
        }
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32), CaptureError> {
    let decode = |msg: &str| CaptureError::Decode(msg.to_string());
    let buffer = sample.buffer().ok_or_else(|| decode("sample missing buffer"))?;
    let caps = sample.caps().ok_or_else(|| decode("sample missing caps"))?;
    let info = gstreamer_video::VideoInfo::from_caps(caps)
        .map_err(|_| decode("caps are not raw video"))?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer
        .map_readable()
        .map_err(|_| decode("buffer is not readable"))?;
    let data = map.as_slice();

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .ok_or_else(|| decode("buffer shorter than frame"))?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .ok_or_else(|| decode("buffer row is out of bounds"))?,
        );
    }
    Ok((pixels, width, height))
}
