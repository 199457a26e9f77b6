//! Static source registry.
//!
//! Loaded once at startup from a JSON list of drone entries and read-only
//! afterwards. Malformed entries are skipped with a warning; they never fail
//! the whole load.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Ids that collide with fixed API routes.
const RESERVED_IDS: &[&str] = &["all"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceRecord {
    pub id: String,
    /// Used only for inference.
    pub capture_url: String,
    /// Used only for manifest relay. Defaults to `capture_url`.
    pub playback_url: String,
}

/// One entry of the registry file. Accepts the `drone_id`/`video_source`
/// spelling as well as `id`/`capture_url`.
#[derive(Debug, Deserialize)]
struct SourceEntry {
    #[serde(alias = "drone_id")]
    id: Option<String>,
    #[serde(alias = "video_source")]
    capture_url: Option<String>,
    playback_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, SourceRecord>,
}

impl SourceRegistry {
    /// Load the registry file.
    ///
    /// A missing file yields an empty registry (logged); unreadable or
    /// non-array JSON is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::error!("source registry {} not found", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read source registry {}: {}", path.display(), e))?;
        let registry = Self::from_json(&raw)
            .map_err(|e| anyhow!("invalid source registry {}: {}", path.display(), e))?;
        log::info!(
            "found {} source(s) in {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let entries: Vec<Value> = serde_json::from_str(raw)?;
        Ok(Self::from_entries(entries))
    }

    /// Build from raw JSON values, skipping anything malformed.
    pub fn from_entries(entries: Vec<Value>) -> Self {
        let mut sources = BTreeMap::new();
        for raw in entries {
            let Some(record) = parse_entry(&raw) else {
                log::warn!("skipping invalid source entry: {}", raw);
                continue;
            };
            if RESERVED_IDS.contains(&record.id.as_str()) {
                log::warn!("skipping source with reserved id '{}'", record.id);
                continue;
            }
            if sources.contains_key(&record.id) {
                log::warn!("skipping duplicate source id '{}'", record.id);
                continue;
            }
            sources.insert(record.id.clone(), record);
        }
        Self { sources }
    }

    pub fn from_records(records: impl IntoIterator<Item = SourceRecord>) -> Self {
        Self {
            sources: records
                .into_iter()
                .map(|record| (record.id.clone(), record))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&SourceRecord> {
        self.sources.get(id)
    }

    pub fn playback_url(&self, id: &str) -> Option<&str> {
        self.get(id).map(|record| record.playback_url.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceRecord> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

fn parse_entry(raw: &Value) -> Option<SourceRecord> {
    let entry: SourceEntry = serde_json::from_value(raw.clone()).ok()?;
    let id = non_blank(entry.id).filter(|id| !id.chars().any(char::is_control))?;
    let capture_url = non_blank(entry.capture_url)?;
    let playback_url = non_blank(entry.playback_url).unwrap_or_else(|| capture_url.clone());
    Some(SourceRecord {
        id,
        capture_url,
        playback_url,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
