//! Drone Watch
//!
//! Continuously classifies live drone video for violent activity and serves
//! the latest verdict per drone over HTTP, alongside a relay for the drones'
//! HLS streams.
//!
//! # Architecture
//!
//! - One ingestion worker thread per registered source captures frames,
//!   scores them with a shared classifier and publishes the verdict.
//! - Verdicts live in an in-memory [`AlertStore`]. Each source has exactly
//!   one writer; the HTTP layer only reads.
//! - The HTTP API answers alert and status queries and proxies HLS manifests
//!   and segments from their origin servers.
//!
//! # Module Structure
//!
//! - `registry`: drone id to capture/playback URL mapping
//! - `ingest`: capture sessions (synthetic `stub://` sources, GStreamer)
//! - `frame`: decoded frames and model input preparation
//! - `classify`: frame classifier backends
//! - `alert`: verdict types and the shared alert store
//! - `worker` / `supervisor`: per-source ingestion loops and their lifecycle
//! - `relay`: HLS manifest and segment proxy
//! - `api`: HTTP server
//! - `config`: daemon configuration

pub mod alert;
pub mod api;
pub mod classify;
pub mod config;
pub mod frame;
pub mod ingest;
pub mod registry;
pub mod relay;
pub mod supervisor;
pub mod worker;

pub use alert::{AlertLabel, AlertRecord, AlertStore, AlertWriter, VIOLENCE_THRESHOLD};
pub use api::{ApiConfig, ApiHandle, ApiServer, ApiState};
pub use classify::{
    ClassifierSettings, ClassifyError, FrameClassifier, ModelStatus, SharedClassifier,
    StubClassifier,
};
pub use config::DaemonConfig;
pub use frame::{ChannelOrder, Frame, InputShape, ModelInput};
pub use ingest::{CaptureError, CaptureOpener, CaptureSession, DefaultCaptureOpener};
pub use registry::{SourceRecord, SourceRegistry};
pub use relay::{MediaRelay, RelayConfig, RelayError, RelayedMedia};
pub use supervisor::{ShutdownSignal, Supervisor};
pub use worker::{IngestionWorker, WorkerStatsSnapshot, WorkerTiming};
