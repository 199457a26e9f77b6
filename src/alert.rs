//! Latest-alert state shared between ingestion workers and API readers.
//!
//! Every source id has exactly one writer (its ingestion worker) holding an
//! `AlertWriter`. Readers go through `AlertStore::get` / `AlertStore::get_all`
//! and never mutate. A write replaces the whole record under the write lock,
//! so a reader never observes a label from one write paired with a score
//! from another.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Probabilities strictly above this value classify as violence.
pub const VIOLENCE_THRESHOLD: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLabel {
    Safe,
    ViolenceDetected,
    ModelUnavailable,
    ProcessingError,
    /// Sentinel for ids that have no record yet.
    NoData,
}

impl AlertLabel {
    /// Human-readable text used in the `alert` field of the wire form.
    pub fn description(self) -> &'static str {
        match self {
            AlertLabel::Safe => "Safe",
            AlertLabel::ViolenceDetected => "Violence detected",
            AlertLabel::ModelUnavailable => "Error: Model not loaded",
            AlertLabel::ProcessingError => "Processing Error",
            AlertLabel::NoData => "No data",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(into = "AlertWire")]
pub struct AlertRecord {
    pub label: AlertLabel,
    pub score: f32,
    /// Unix milliseconds of the write. `None` only on the no-data sentinel.
    pub updated_at: Option<u64>,
}

impl AlertRecord {
    /// Classify a probability. The threshold is strict: exactly 0.5 is `Safe`.
    pub fn from_probability(probability: f32) -> Self {
        let label = if probability > VIOLENCE_THRESHOLD {
            AlertLabel::ViolenceDetected
        } else {
            AlertLabel::Safe
        };
        Self {
            label,
            score: probability,
            updated_at: Some(now_ms()),
        }
    }

    pub fn model_unavailable() -> Self {
        Self::without_score(AlertLabel::ModelUnavailable)
    }

    pub fn processing_error() -> Self {
        Self::without_score(AlertLabel::ProcessingError)
    }

    pub fn no_data() -> Self {
        Self {
            label: AlertLabel::NoData,
            score: 0.0,
            updated_at: None,
        }
    }

    fn without_score(label: AlertLabel) -> Self {
        Self {
            label,
            score: 0.0,
            updated_at: Some(now_ms()),
        }
    }
}

#[derive(Serialize)]
struct AlertWire {
    alert: &'static str,
    label: AlertLabel,
    score: f32,
    updated_at: Option<u64>,
}

impl From<AlertRecord> for AlertWire {
    fn from(record: AlertRecord) -> Self {
        Self {
            alert: record.label.description(),
            label: record.label,
            score: record.score,
            updated_at: record.updated_at,
        }
    }
}

/// Concurrent map of source id to latest alert.
///
/// Cloning is cheap and yields a handle to the same table.
#[derive(Clone, Default)]
pub struct AlertStore {
    records: Arc<RwLock<HashMap<String, AlertRecord>>>,
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest record for `id`, or the no-data sentinel.
    pub fn get(&self, id: &str) -> AlertRecord {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.get(id).cloned().unwrap_or_else(AlertRecord::no_data)
    }

    /// Point-in-time snapshot of every id that has a record.
    pub fn get_all(&self) -> BTreeMap<String, AlertRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim the single writer handle for `id`.
    ///
    /// Fails while another live `AlertWriter` holds the same id.
    pub fn writer(&self, id: &str) -> Result<AlertWriter> {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        if !claimed.insert(id.to_string()) {
            return Err(anyhow!("alert writer for '{}' already claimed", id));
        }
        Ok(AlertWriter {
            id: id.to_string(),
            store: self.clone(),
        })
    }

    fn put(&self, id: &str, record: AlertRecord) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(id.to_string(), record);
    }

    fn release(&self, id: &str) {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        claimed.remove(id);
    }
}

/// Exclusive write handle for one source id. Not `Clone`.
pub struct AlertWriter {
    id: String,
    store: AlertStore,
}

impl AlertWriter {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Replace the record for this writer's id.
    pub fn publish(&self, record: AlertRecord) {
        self.store.put(&self.id, record);
    }
}

impl Drop for AlertWriter {
    fn drop(&mut self) {
        // The record stays; only the claim is released.
        self.store.release(&self.id);
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
