//! Capture sessions.
//!
//! A capture session wraps one open handle to a capture URL and yields
//! decoded RGB frames. Workers own their session exclusively and replace it
//! on every reconnect; dropping a session closes the underlying handle.
//!
//! - `stub://` URLs: synthetic frames (tests, demos)
//! - everything else: GStreamer `uridecodebin` (feature: capture-gstreamer);
//!   plain file paths are opened as `file://` URIs

#[cfg(feature = "capture-gstreamer")]
mod gst;
pub(crate) mod normalize;
pub mod synthetic;

use std::path::Path;

use thiserror::Error;
use url::Url;

use crate::frame::Frame;

pub use synthetic::SyntheticCapture;

/// Why a capture session failed. Every variant is transient to the worker.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open capture {url}: {detail}")]
    Open { url: String, detail: String },
    #[error("capture reached end of stream")]
    EndOfStream,
    #[error("capture stalled: no frame within {0} ms")]
    Stalled(u64),
    #[error("capture decode failed: {0}")]
    Decode(String),
}

pub trait CaptureSession: Send {
    /// Block until the next frame is decoded.
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;
}

/// Opens capture sessions for a URL. Shared by all workers.
pub trait CaptureOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn CaptureSession>, CaptureError>;
}

/// Default opener: synthetic for `stub://`, GStreamer otherwise.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCaptureOpener;

impl CaptureOpener for DefaultCaptureOpener {
    fn open(&self, url: &str) -> Result<Box<dyn CaptureSession>, CaptureError> {
        if url.starts_with("stub://") {
            return Ok(Box::new(SyntheticCapture::open(url)?));
        }
        #[cfg(feature = "capture-gstreamer")]
        {
            Ok(Box::new(gst::GstreamerCapture::open(url)?))
        }
        #[cfg(not(feature = "capture-gstreamer"))]
        {
            Err(CaptureError::Open {
                url: url.to_string(),
                detail: "non-stub capture requires the capture-gstreamer feature".to_string(),
            })
        }
    }
}

/// Normalize a capture location to a URI.
///
/// Plain file paths (relative ones resolve against the working directory)
/// become `file://` URIs. The result never contains `"`.
pub fn capture_uri(location: &str) -> Result<String, CaptureError> {
    let open_err = |detail: &str| CaptureError::Open {
        url: location.to_string(),
        detail: detail.to_string(),
    };
    let uri = match Url::parse(location) {
        // Single-letter schemes are Windows drive letters.
        Ok(url) if url.scheme().len() > 1 => url,
        _ => {
            let path = Path::new(location);
            let absolute = if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map_err(|e| open_err(&format!("resolve relative path: {}", e)))?
                    .join(path)
            };
            Url::from_file_path(&absolute)
                .map_err(|_| open_err("not a valid URI or file path"))?
        }
    };
    let uri = uri.to_string();
    if uri.contains('"') {
        return Err(open_err("URI contains a double quote"));
    }
    Ok(uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_opener_handles_stub_urls() {
        let opener = DefaultCaptureOpener;
        let mut session = opener.open("stub://drone1").expect("stub opens");
        let frame = session.read_frame().expect("frame");
        assert_eq!(frame.pixels().len(), (frame.width * frame.height * 3) as usize);
    }

    #[test]
    fn plain_paths_become_file_uris() -> Result<(), CaptureError> {
        let relative = capture_uri("NV_13.mp4")?;
        assert!(relative.starts_with("file:///"), "{}", relative);
        assert!(relative.ends_with("/NV_13.mp4"), "{}", relative);

        #[cfg(unix)]
        assert_eq!(
            capture_uri("/videos/drone one.mp4")?,
            "file:///videos/drone%20one.mp4"
        );
        Ok(())
    }

    #[test]
    fn uris_keep_their_scheme_and_never_carry_quotes() -> Result<(), CaptureError> {
        assert_eq!(capture_uri("rtsp://camera/1")?, "rtsp://camera/1");
        assert_eq!(
            capture_uri("http://origin/hls/drone1.m3u8")?,
            "http://origin/hls/drone1.m3u8"
        );
        let quoted = capture_uri("http://origin/a\"b.m3u8")?;
        assert!(!quoted.contains('"'), "{}", quoted);
        Ok(())
    }

    #[cfg(not(feature = "capture-gstreamer"))]
    #[test]
    fn default_opener_rejects_real_urls_without_backend() {
        let opener = DefaultCaptureOpener;
        let err = opener.open("rtsp://camera/1").err().expect("open fails");
        assert!(matches!(err, CaptureError::Open { .. }));
    }
}
