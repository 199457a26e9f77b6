//! Worker supervision and coordinated shutdown.
//!
//! The supervisor spawns one named thread per registered source and keeps
//! its join handle. Shutdown is cooperative: triggering the signal wakes
//! every worker parked in a reconnect delay or loop interval. A worker blocked
//! inside a frame read finishes that read first.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::alert::AlertStore;
use crate::classify::SharedClassifier;
use crate::ingest::CaptureOpener;
use crate::registry::SourceRegistry;
use crate::worker::{IngestionWorker, WorkerStats, WorkerStatsSnapshot, WorkerTiming};

/// Process-wide stop flag with interruptible waits.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `timeout` unless shutdown is triggered first.
    ///
    /// Returns true when shutdown has been triggered.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

struct WorkerHandle {
    source_id: String,
    stats: Arc<WorkerStats>,
    join: JoinHandle<()>,
}

pub struct Supervisor {
    workers: Vec<WorkerHandle>,
    shutdown: ShutdownSignal,
}

impl Supervisor {
    /// Spawn one worker per source in `registry`.
    pub fn spawn(
        registry: &SourceRegistry,
        classifier: Option<SharedClassifier>,
        opener: Arc<dyn CaptureOpener>,
        alerts: &AlertStore,
        timing: WorkerTiming,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        let mut workers = Vec::with_capacity(registry.len());
        for source in registry.iter() {
            let writer = alerts.writer(&source.id)?;
            let worker = IngestionWorker::new(
                source.clone(),
                classifier.clone(),
                opener.clone(),
                writer,
                timing,
                shutdown.clone(),
            );
            let stats = worker.stats();
            log::info!("starting ingestion worker for '{}'", source.id);
            let join = std::thread::Builder::new()
                .name(thread_name(&source.id))
                .spawn(move || worker.run())
                .with_context(|| format!("spawn ingestion worker for '{}'", source.id))?;
            workers.push(WorkerHandle {
                source_id: source.id.clone(),
                stats,
                join,
            });
        }
        Ok(Self { workers, shutdown })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Ids of workers whose thread is still running.
    pub fn running(&self) -> Vec<&str> {
        self.workers
            .iter()
            .filter(|w| !w.join.is_finished())
            .map(|w| w.source_id.as_str())
            .collect()
    }

    pub fn stats(&self) -> Vec<(&str, WorkerStatsSnapshot)> {
        self.workers
            .iter()
            .map(|w| (w.source_id.as_str(), w.stats.snapshot()))
            .collect()
    }

    /// Trigger shutdown and join every worker.
    pub fn shutdown(self) {
        self.shutdown.trigger();
        for worker in self.workers {
            if worker.join.join().is_err() {
                log::error!("ingestion worker for '{}' panicked", worker.source_id);
            }
        }
    }
}

/// Thread names may not contain NUL; control characters are dropped.
fn thread_name(source_id: &str) -> String {
    let id: String = source_id.chars().filter(|c| !c.is_control()).collect();
    format!("ingest-{}", id)
}
