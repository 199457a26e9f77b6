//! Per-source ingestion worker.
//!
//! One worker per registered source, each on its own thread. The loop reads
//! a frame, classifies it, publishes the alert and sleeps. Capture failures
//! drop the session and retry the same URL after a fixed delay, forever.
//! Classification failures publish `ProcessingError` and keep looping.
//! Nothing a worker hits ever leaves its thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::alert::{AlertRecord, AlertWriter};
use crate::classify::{checked_score, ClassifyError, SharedClassifier};
use crate::ingest::{CaptureError, CaptureOpener, CaptureSession};
use crate::registry::SourceRecord;
use crate::supervisor::ShutdownSignal;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerTiming {
    /// Wait between a failed read and the next open. No backoff.
    pub reconnect_delay: Duration,
    /// Wait between classifications.
    pub interval: Duration,
}

impl Default for WorkerTiming {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            interval: DEFAULT_INTERVAL,
        }
    }
}

/// Counters for one worker, readable from other threads.
#[derive(Debug, Default)]
pub struct WorkerStats {
    frames_classified: AtomicU64,
    capture_failures: AtomicU64,
    processing_errors: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    pub frames_classified: u64,
    pub capture_failures: u64,
    pub processing_errors: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            frames_classified: self.frames_classified.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            processing_errors: self.processing_errors.load(Ordering::Relaxed),
        }
    }
}

pub struct IngestionWorker {
    source: SourceRecord,
    classifier: Option<SharedClassifier>,
    opener: Arc<dyn CaptureOpener>,
    writer: AlertWriter,
    timing: WorkerTiming,
    shutdown: ShutdownSignal,
    stats: Arc<WorkerStats>,
}

impl IngestionWorker {
    pub fn new(
        source: SourceRecord,
        classifier: Option<SharedClassifier>,
        opener: Arc<dyn CaptureOpener>,
        writer: AlertWriter,
        timing: WorkerTiming,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            source,
            classifier,
            opener,
            writer,
            timing,
            shutdown,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Run until shutdown. Returns immediately when no classifier is loaded.
    pub fn run(self) {
        let Some(classifier) = self.classifier.clone() else {
            log::warn!(
                "[{}] classifier unavailable; publishing ModelUnavailable and stopping",
                self.source.id
            );
            self.writer.publish(AlertRecord::model_unavailable());
            return;
        };

        log::info!("[{}] ingestion started", self.source.id);
        let mut session = self.open_session();
        loop {
            if self.shutdown.is_triggered() {
                break;
            }
            let read = match session.as_mut() {
                Some(active) => active.read_frame(),
                None => Err(CaptureError::Open {
                    url: self.source.capture_url.clone(),
                    detail: "no open session".to_string(),
                }),
            };
            let frame = match read {
                Ok(frame) => frame,
                Err(err) => {
                    self.stats.capture_failures.fetch_add(1, Ordering::Relaxed);
                    self.log_capture_failure(&err);
                    // Close before waiting so the upstream handle is released.
                    drop(session.take());
                    if self.shutdown.wait(self.timing.reconnect_delay) {
                        break;
                    }
                    session = self.open_session();
                    continue;
                }
            };

            let record = match frame
                .to_model_input(classifier.input_shape())
                .map_err(|e| ClassifyError::Input(e.to_string()))
                .and_then(|input| checked_score(classifier.as_ref(), &input))
            {
                Ok(probability) => {
                    self.stats.frames_classified.fetch_add(1, Ordering::Relaxed);
                    log::debug!(
                        "[{}] p={:.3} in {:?}",
                        self.source.id,
                        probability,
                        frame.captured_at().elapsed()
                    );
                    AlertRecord::from_probability(probability)
                }
                Err(err) => {
                    self.stats.processing_errors.fetch_add(1, Ordering::Relaxed);
                    log::warn!("[{}] processing error: {}", self.source.id, err);
                    AlertRecord::processing_error()
                }
            };
            self.writer.publish(record);

            if self.shutdown.wait(self.timing.interval) {
                break;
            }
        }
        log::info!("[{}] ingestion stopped", self.source.id);
    }

    fn open_session(&self) -> Option<Box<dyn CaptureSession>> {
        match self.opener.open(&self.source.capture_url) {
            Ok(session) => Some(session),
            Err(err) => {
                log::warn!("[{}] {}", self.source.id, err);
                None
            }
        }
    }

    fn log_capture_failure(&self, err: &CaptureError) {
        let delay = self.timing.reconnect_delay;
        match err {
            CaptureError::EndOfStream => log::info!(
                "[{}] end of stream; reconnecting in {:?}",
                self.source.id,
                delay
            ),
            other => log::warn!(
                "[{}] no frames ({}); reconnecting in {:?}",
                self.source.id,
                other,
                delay
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertLabel, AlertStore};
    use crate::classify::FrameClassifier;
    use crate::frame::{Frame, InputShape, ModelInput};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;

    fn source(id: &str) -> SourceRecord {
        SourceRecord {
            id: id.to_string(),
            capture_url: format!("test://{}", id),
            playback_url: format!("http://origin/{}.m3u8", id),
        }
    }

    fn fast_timing() -> WorkerTiming {
        WorkerTiming {
            reconnect_delay: Duration::from_millis(300),
            interval: Duration::from_millis(20),
        }
    }

    /// Each open pops the next script; a script is a list of read outcomes
    /// followed by end of stream.
    struct ScriptedOpener {
        scripts: Mutex<VecDeque<Vec<bool>>>,
        opens: Mutex<Vec<Instant>>,
        /// Every read across all sessions: when it happened and whether it succeeded.
        reads: Arc<Mutex<Vec<(Instant, bool)>>>,
    }

    impl ScriptedOpener {
        fn new(scripts: Vec<Vec<bool>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                opens: Mutex::new(Vec::new()),
                reads: Arc::new(Mutex::new(Vec::new())),
            })
        }
    }

    struct ScriptedSession {
        reads: VecDeque<bool>,
        log: Arc<Mutex<Vec<(Instant, bool)>>>,
    }

    impl CaptureSession for ScriptedSession {
        fn read_frame(&mut self) -> Result<Frame, CaptureError> {
            let outcome = self.reads.pop_front();
            self.log
                .lock()
                .unwrap()
                .push((Instant::now(), outcome == Some(true)));
            match outcome {
                Some(true) => Frame::new(vec![128u8; 4 * 4 * 3], 4, 4)
                    .map_err(|e| CaptureError::Decode(e.to_string())),
                Some(false) => Err(CaptureError::Decode("corrupt frame".to_string())),
                None => Err(CaptureError::EndOfStream),
            }
        }
    }

    impl CaptureOpener for ScriptedOpener {
        fn open(&self, url: &str) -> Result<Box<dyn CaptureSession>, CaptureError> {
            self.opens.lock().unwrap().push(Instant::now());
            match self.scripts.lock().unwrap().pop_front() {
                Some(reads) => Ok(Box::new(ScriptedSession {
                    reads: reads.into(),
                    log: self.reads.clone(),
                })),
                None => Err(CaptureError::Open {
                    url: url.to_string(),
                    detail: "script exhausted".to_string(),
                }),
            }
        }
    }

    struct FixedClassifier {
        outcomes: Mutex<VecDeque<Result<f32, ()>>>,
        fallback: f32,
    }

    impl FixedClassifier {
        fn new(outcomes: Vec<Result<f32, ()>>, fallback: f32) -> SharedClassifier {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                fallback,
            })
        }
    }

    impl FrameClassifier for FixedClassifier {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn input_shape(&self) -> InputShape {
            InputShape {
                width: 4,
                height: 4,
                ..InputShape::default()
            }
        }

        fn score(&self, _input: &ModelInput) -> Result<f32, ClassifyError> {
            match self.outcomes.lock().unwrap().pop_front() {
                Some(Ok(p)) => Ok(p),
                Some(Err(())) => Err(ClassifyError::Inference("boom".to_string())),
                None => Ok(self.fallback),
            }
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn missing_classifier_publishes_model_unavailable_once() {
        let store = AlertStore::new();
        let opener = ScriptedOpener::new(vec![vec![true; 10]]);
        let worker = IngestionWorker::new(
            source("drone1"),
            None,
            opener.clone(),
            store.writer("drone1").unwrap(),
            fast_timing(),
            ShutdownSignal::new(),
        );
        worker.run();

        let record = store.get("drone1");
        assert_eq!(record.label, AlertLabel::ModelUnavailable);
        assert_eq!(record.score, 0.0);
        // The capture loop was never entered.
        assert!(opener.opens.lock().unwrap().is_empty());
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(store.get("drone1"), record);
    }

    #[test]
    fn classifies_frames_and_applies_threshold() {
        let store = AlertStore::new();
        let shutdown = ShutdownSignal::new();
        let worker = IngestionWorker::new(
            source("drone1"),
            Some(FixedClassifier::new(vec![Ok(0.9)], 0.5)),
            ScriptedOpener::new(vec![vec![true; 1000]]),
            store.writer("drone1").unwrap(),
            WorkerTiming {
                reconnect_delay: Duration::from_millis(300),
                interval: Duration::from_millis(150),
            },
            shutdown.clone(),
        );
        let stats = worker.stats();
        let handle = std::thread::spawn(move || worker.run());

        assert!(wait_for(
            || store.get("drone1").label == AlertLabel::ViolenceDetected,
            Duration::from_secs(2)
        ));
        // Fallback 0.5 is exactly on the threshold: Safe.
        assert!(wait_for(
            || store.get("drone1").label == AlertLabel::Safe,
            Duration::from_secs(2)
        ));
        assert_eq!(store.get("drone1").score, 0.5);

        shutdown.trigger();
        handle.join().unwrap();
        assert!(stats.snapshot().frames_classified >= 2);
    }

    #[test]
    fn classification_error_is_recorded_and_loop_continues() {
        let store = AlertStore::new();
        let shutdown = ShutdownSignal::new();
        let worker = IngestionWorker::new(
            source("drone1"),
            Some(FixedClassifier::new(vec![Err(()), Ok(2.0)], 0.2)),
            ScriptedOpener::new(vec![vec![true; 1000]]),
            store.writer("drone1").unwrap(),
            WorkerTiming {
                reconnect_delay: Duration::from_millis(300),
                interval: Duration::from_millis(200),
            },
            shutdown.clone(),
        );
        let stats = worker.stats();
        let handle = std::thread::spawn(move || worker.run());

        assert!(wait_for(
            || store.get("drone1").label == AlertLabel::ProcessingError,
            Duration::from_secs(2)
        ));
        assert_eq!(store.get("drone1").score, 0.0);
        // 2.0 is not a probability and is also a processing error; then 0.2.
        assert!(wait_for(
            || store.get("drone1").label == AlertLabel::Safe,
            Duration::from_secs(3)
        ));
        assert!((store.get("drone1").score - 0.2).abs() < 1e-6);

        shutdown.trigger();
        handle.join().unwrap();
        assert_eq!(stats.snapshot().processing_errors, 2);
    }

    #[test]
    fn failed_read_waits_reconnect_delay_then_resumes() {
        let store = AlertStore::new();
        let shutdown = ShutdownSignal::new();
        let timing = fast_timing();
        // First session: one good frame, then a decode failure.
        let opener = ScriptedOpener::new(vec![vec![true, false], vec![true; 1000]]);
        let worker = IngestionWorker::new(
            source("drone1"),
            Some(FixedClassifier::new(vec![], 0.1)),
            opener.clone(),
            store.writer("drone1").unwrap(),
            timing,
            shutdown.clone(),
        );
        let stats = worker.stats();
        let handle = std::thread::spawn(move || worker.run());

        assert!(wait_for(
            || opener.opens.lock().unwrap().len() == 2,
            Duration::from_secs(3)
        ));
        assert!(wait_for(
            || stats.snapshot().frames_classified >= 3,
            Duration::from_secs(3)
        ));
        shutdown.trigger();
        handle.join().unwrap();

        let reads = opener.reads.lock().unwrap();
        let failed = reads
            .iter()
            .position(|(_, ok)| !ok)
            .expect("one failed read");
        let (failed_at, _) = reads[failed];
        let (resumed_at, resumed_ok) = reads[failed + 1];
        assert!(resumed_ok);
        let gap = resumed_at.duration_since(failed_at);
        assert!(gap >= timing.reconnect_delay, "resumed after {:?}", gap);

        // Back on the normal cadence once reconnected.
        let (next_at, next_ok) = reads[failed + 2];
        assert!(next_ok);
        let cadence = next_at.duration_since(resumed_at);
        assert!(cadence >= timing.interval, "next read after {:?}", cadence);
        assert!(
            cadence < timing.reconnect_delay,
            "next read after {:?}",
            cadence
        );
        assert_eq!(stats.snapshot().capture_failures, 1);
        assert_eq!(store.get("drone1").label, AlertLabel::Safe);
    }

    #[test]
    fn open_failures_are_retried_without_limit() {
        let store = AlertStore::new();
        let shutdown = ShutdownSignal::new();
        let opener = ScriptedOpener::new(vec![]);
        let worker = IngestionWorker::new(
            source("drone1"),
            Some(FixedClassifier::new(vec![], 0.1)),
            opener.clone(),
            store.writer("drone1").unwrap(),
            WorkerTiming {
                reconnect_delay: Duration::from_millis(30),
                interval: Duration::from_millis(30),
            },
            shutdown.clone(),
        );
        let handle = std::thread::spawn(move || worker.run());

        assert!(wait_for(
            || opener.opens.lock().unwrap().len() >= 5,
            Duration::from_secs(3)
        ));
        shutdown.trigger();
        handle.join().unwrap();
        // Nothing readable yet: still no data.
        assert_eq!(store.get("drone1").label, AlertLabel::NoData);
    }

    #[test]
    fn shutdown_interrupts_reconnect_delay() {
        let store = AlertStore::new();
        let shutdown = ShutdownSignal::new();
        let worker = IngestionWorker::new(
            source("drone1"),
            Some(FixedClassifier::new(vec![], 0.1)),
            ScriptedOpener::new(vec![]),
            store.writer("drone1").unwrap(),
            WorkerTiming {
                reconnect_delay: Duration::from_secs(60),
                interval: Duration::from_secs(1),
            },
            shutdown.clone(),
        );
        let handle = std::thread::spawn(move || worker.run());
        std::thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        shutdown.trigger();
        handle.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
