//! HLS manifest and segment relay.
//!
//! Stateless: every call resolves an upstream URL, fetches it and hands the
//! body back byte-for-byte with a fixed content type. The relay only looks at
//! the request path, never at the media. Upstream failures become
//! `RelayError::UpstreamUnavailable` with a short detail safe to put on the
//! wire; the full error goes to the log.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use thiserror::Error;
use url::Url;

use crate::registry::SourceRegistry;

pub const HLS_MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const TRANSPORT_STREAM_CONTENT_TYPE: &str = "video/MP2T";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("unknown source '{0}'")]
    NotFound(String),
    #[error("invalid segment path '{0}'")]
    InvalidPath(String),
    #[error("upstream unavailable: {detail}")]
    UpstreamUnavailable { detail: String },
}

impl RelayError {
    /// HTTP status the API answers with.
    pub fn status(&self) -> u16 {
        match self {
            RelayError::NotFound(_) => 404,
            RelayError::InvalidPath(_) => 400,
            RelayError::UpstreamUnavailable { .. } => 502,
        }
    }

    /// Machine-readable error code for JSON bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::NotFound(_) => "unknown_source",
            RelayError::InvalidPath(_) => "invalid_path",
            RelayError::UpstreamUnavailable { .. } => "upstream_unavailable",
        }
    }
}

/// Upstream bytes plus the content type to serve them with.
#[derive(Debug, PartialEq, Eq)]
pub struct RelayedMedia {
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Origin all segment paths resolve against. Must end with '/'.
    pub segment_base_url: String,
    pub timeout: Duration,
    pub max_body_bytes: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            segment_base_url: "http://127.0.0.1:8080/hls/".to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

pub struct MediaRelay {
    registry: Arc<SourceRegistry>,
    segment_base: Url,
    agent: ureq::Agent,
    max_body_bytes: u64,
}

impl MediaRelay {
    pub fn new(registry: Arc<SourceRegistry>, cfg: &RelayConfig) -> Result<Self> {
        let segment_base = parse_segment_base(&cfg.segment_base_url)?;
        let agent = ureq::AgentBuilder::new().timeout(cfg.timeout).build();
        Ok(Self {
            registry,
            segment_base,
            agent,
            max_body_bytes: cfg.max_body_bytes,
        })
    }

    /// Relay the HLS manifest of a registered source.
    pub fn fetch_manifest(&self, source_id: &str) -> Result<RelayedMedia, RelayError> {
        let url = self
            .registry
            .playback_url(source_id)
            .ok_or_else(|| RelayError::NotFound(source_id.to_string()))?;
        let body = self.fetch(url)?;
        Ok(RelayedMedia {
            content_type: HLS_MANIFEST_CONTENT_TYPE,
            body,
        })
    }

    /// Relay a media segment from the fixed segment origin.
    pub fn fetch_segment(&self, path: &str) -> Result<RelayedMedia, RelayError> {
        let url = self.segment_url(path)?;
        let body = self.fetch(url.as_str())?;
        Ok(RelayedMedia {
            content_type: TRANSPORT_STREAM_CONTENT_TYPE,
            body,
        })
    }

    fn segment_url(&self, path: &str) -> Result<Url, RelayError> {
        let invalid = || RelayError::InvalidPath(path.to_string());
        if path.is_empty()
            || path.starts_with('/')
            || path.contains("://")
            || path.contains('\\')
            || path.split('/').any(|part| part == ".." || part == ".")
        {
            return Err(invalid());
        }
        let url = self.segment_base.join(path).map_err(|_| invalid())?;
        if !url.as_str().starts_with(self.segment_base.as_str()) {
            return Err(invalid());
        }
        Ok(url)
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, RelayError> {
        let response = self.agent.get(url).call().map_err(|err| {
            log::warn!("relay GET {} failed: {}", url, err);
            let detail = match &err {
                ureq::Error::Status(code, _) => format!("upstream returned status {}", code),
                ureq::Error::Transport(transport) => {
                    format!("upstream request failed: {}", transport.kind())
                }
            };
            RelayError::UpstreamUnavailable { detail }
        })?;

        let mut body = Vec::new();
        response
            .into_reader()
            .take(self.max_body_bytes + 1)
            .read_to_end(&mut body)
            .map_err(|err| {
                log::warn!("relay body read from {} failed: {}", url, err);
                RelayError::UpstreamUnavailable {
                    detail: "upstream body read failed".to_string(),
                }
            })?;
        if body.len() as u64 > self.max_body_bytes {
            log::warn!(
                "relay body from {} exceeds {} bytes",
                url,
                self.max_body_bytes
            );
            return Err(RelayError::UpstreamUnavailable {
                detail: "upstream body too large".to_string(),
            });
        }
        Ok(body)
    }
}

fn parse_segment_base(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| anyhow!("invalid segment base url '{}': {}", raw, e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!("segment base url must be http(s): '{}'", raw));
    }
    if !url.path().ends_with('/') {
        return Err(anyhow!("segment base url must end with '/': '{}'", raw));
    }
    Ok(url)
}
