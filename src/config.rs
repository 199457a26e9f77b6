use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::ApiConfig;
use crate::classify::ClassifierSettings;
use crate::frame::{ChannelOrder, InputShape};
use crate::relay::RelayConfig;
use crate::worker::WorkerTiming;

const DEFAULT_API_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 64;
const DEFAULT_SOURCES_PATH: &str = "drones.json";
const DEFAULT_MODEL_BACKEND: &str = "tract";
const DEFAULT_MODEL_PATH: &str = "frame_cnn_model_one.onnx";
const DEFAULT_INPUT_SIZE: u32 = 128;
const DEFAULT_SEGMENT_BASE_URL: &str = "http://127.0.0.1:8080/hls/";
const DEFAULT_RELAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RELAY_MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
const DEFAULT_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DaemonConfigFile {
    api: Option<ApiConfigFile>,
    sources: Option<SourcesConfigFile>,
    model: Option<ModelConfigFile>,
    relay: Option<RelayConfigFile>,
    worker: Option<WorkerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_concurrent_requests: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct SourcesConfigFile {
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    channel_order: Option<ChannelOrder>,
}

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    segment_base_url: Option<String>,
    timeout_secs: Option<u64>,
    max_body_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct WorkerConfigFile {
    reconnect_delay_ms: Option<u64>,
    interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub api: ApiConfig,
    pub sources_path: PathBuf,
    pub classifier: ClassifierSettings,
    pub relay: RelayConfig,
    pub worker: WorkerTiming,
}

impl DaemonConfig {
    /// Load from the file named by `DRONE_WATCH_CONFIG` (if set), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DRONE_WATCH_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (or defaults when `None`), then apply
    /// environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => DaemonConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DaemonConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let sources = file.sources.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let relay = file.relay.unwrap_or_default();
        let worker = file.worker.unwrap_or_default();

        Self {
            api: ApiConfig {
                addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
                max_concurrent_requests: api
                    .max_concurrent_requests
                    .unwrap_or(DEFAULT_MAX_CONCURRENT_REQUESTS),
            },
            sources_path: sources
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCES_PATH)),
            classifier: ClassifierSettings {
                backend: model
                    .backend
                    .unwrap_or_else(|| DEFAULT_MODEL_BACKEND.to_string()),
                model_path: model
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                shape: InputShape {
                    width: model.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
                    height: model.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
                    channel_order: model.channel_order.unwrap_or_default(),
                },
            },
            relay: RelayConfig {
                segment_base_url: relay
                    .segment_base_url
                    .unwrap_or_else(|| DEFAULT_SEGMENT_BASE_URL.to_string()),
                timeout: Duration::from_secs(
                    relay.timeout_secs.unwrap_or(DEFAULT_RELAY_TIMEOUT_SECS),
                ),
                max_body_bytes: relay
                    .max_body_bytes
                    .unwrap_or(DEFAULT_RELAY_MAX_BODY_BYTES),
            },
            worker: WorkerTiming {
                reconnect_delay: Duration::from_millis(
                    worker
                        .reconnect_delay_ms
                        .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
                ),
                interval: Duration::from_millis(worker.interval_ms.unwrap_or(DEFAULT_INTERVAL_MS)),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_non_empty("DRONE_WATCH_API_ADDR") {
            self.api.addr = addr;
        }
        if let Some(path) = env_non_empty("DRONE_WATCH_SOURCES") {
            self.sources_path = PathBuf::from(path);
        }
        if let Some(backend) = env_non_empty("DRONE_WATCH_MODEL_BACKEND") {
            self.classifier.backend = backend;
        }
        if let Some(path) = env_non_empty("DRONE_WATCH_MODEL_PATH") {
            self.classifier.model_path = PathBuf::from(path);
        }
        if let Some(order) = env_non_empty("DRONE_WATCH_CHANNEL_ORDER") {
            self.classifier.shape.channel_order = order.parse()?;
        }
        if let Some(url) = env_non_empty("DRONE_WATCH_SEGMENT_BASE_URL") {
            self.relay.segment_base_url = url;
        }
        if let Some(timeout) = env_non_empty("DRONE_WATCH_RELAY_TIMEOUT_SECS") {
            let seconds: u64 = timeout.parse().map_err(|_| {
                anyhow!("DRONE_WATCH_RELAY_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.relay.timeout = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.api
            .addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid api addr '{}': {}", self.api.addr, e))?;
        if self.api.max_concurrent_requests == 0 {
            return Err(anyhow!("max_concurrent_requests must be greater than zero"));
        }

        self.classifier.backend = self.classifier.backend.trim().to_lowercase();
        let shape = self.classifier.shape;
        if shape.width == 0 || shape.height == 0 {
            return Err(anyhow!("model input size must be non-zero"));
        }

        let base = url::Url::parse(&self.relay.segment_base_url).map_err(|e| {
            anyhow!(
                "invalid segment_base_url '{}': {}",
                self.relay.segment_base_url,
                e
            )
        })?;
        if !matches!(base.scheme(), "http" | "https") || !base.path().ends_with('/') {
            return Err(anyhow!(
                "segment_base_url must be an http(s) url ending with '/'"
            ));
        }
        if self.relay.timeout.is_zero() {
            return Err(anyhow!("relay timeout must be greater than zero"));
        }
        if self.relay.max_body_bytes == 0 {
            return Err(anyhow!("relay max_body_bytes must be greater than zero"));
        }
        if self.worker.interval.is_zero() {
            return Err(anyhow!("worker interval must be greater than zero"));
        }
        if self.worker.reconnect_delay.is_zero() {
            return Err(anyhow!("worker reconnect delay must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<DaemonConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
