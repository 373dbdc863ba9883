//! Timer-driven auto-capture loop
//!
//! Drives an [`AutoCapture`] machine from a tokio interval. Each sample runs
//! in its own task; the machine's in-flight guard keeps samples strictly
//! serialized. Outcomes are reported to the host as [`AutoCaptureEvent`]s.

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    AutoCapture, AutoCaptureSpeed, AutoCaptureState, Observation, SampleTicket, SkipReason,
    TickDecision, Transition,
};
use crate::capture::{CameraError, FrameSource};
use crate::pipeline::{CaptureTarget, ScanPipeline};
use crate::shared::AutoCaptureEvent;
use crate::storage::RecordStore;
use crate::vision::PercentCallback;

struct Shared {
    machine: Mutex<AutoCapture>,
    pipeline: Arc<ScanPipeline>,
    source: Arc<dyn FrameSource>,
    store: Arc<dyn RecordStore>,
    target: Mutex<CaptureTarget>,
    events: Sender<AutoCaptureEvent>,
}

impl Shared {
    fn emit(&self, event: AutoCaptureEvent) {
        // The host may have stopped listening
        let _ = self.events.send(event);
    }

    /// Emit only while `ticket` belongs to the running activation
    ///
    /// The send happens under the machine lock, so nothing from a sample
    /// can follow the `Running(false)` that `stop` emits after disabling.
    fn emit_current(&self, ticket: SampleTicket, event: AutoCaptureEvent) -> bool {
        let machine = self.machine.lock();
        if !machine.is_current(ticket) {
            return false;
        }
        let _ = self.events.send(event);
        true
    }
}

/// Clears the in-flight flag however the sample task ends
struct FinishGuard {
    shared: Arc<Shared>,
    ticket: SampleTicket,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.shared.machine.lock().finish(self.ticket);
    }
}

/// Owns the auto-capture timer for one capture target
pub struct AutoCaptureRunner {
    shared: Arc<Shared>,
    interval: Duration,
    cancel: Mutex<Option<CancellationToken>>,
}

impl AutoCaptureRunner {
    pub fn new(
        pipeline: Arc<ScanPipeline>,
        source: Arc<dyn FrameSource>,
        store: Arc<dyn RecordStore>,
        target: CaptureTarget,
        events: Sender<AutoCaptureEvent>,
    ) -> Self {
        let machine = AutoCapture::new(pipeline.gate().clone());
        Self {
            shared: Arc::new(Shared {
                machine: Mutex::new(machine),
                pipeline,
                source,
                store,
                target: Mutex::new(target),
                events,
            }),
            interval: AutoCaptureSpeed::default().interval(),
            cancel: Mutex::new(None),
        }
    }

    pub fn with_speed(self, speed: AutoCaptureSpeed) -> Self {
        self.with_interval(speed.interval())
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn state(&self) -> AutoCaptureState {
        self.shared.machine.lock().state()
    }

    pub fn is_running(&self) -> bool {
        self.cancel
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Enable auto mode and start the timer. Must be called within a tokio runtime.
    pub fn start(&self) {
        let token = CancellationToken::new();
        if let Some(previous) = self.cancel.lock().replace(token.clone()) {
            previous.cancel();
        }

        self.shared.machine.lock().enable();
        info!("Auto-capture started ({:?} interval)", self.interval);
        self.shared.emit(AutoCaptureEvent::Running(true));
        self.shared.emit(AutoCaptureEvent::StateChanged(AutoCaptureState::Waiting));

        tokio::spawn(run_loop(self.shared.clone(), token, self.interval));
    }

    /// Cancel the timer; samples still running are discarded
    pub fn stop(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
        self.shared.machine.lock().disable();
        info!("Auto-capture stopped");
        self.shared.emit(AutoCaptureEvent::Running(false));
    }

    /// Point the loop at a new target; the machine starts over in `Waiting`
    pub fn set_target(&self, target: CaptureTarget) {
        *self.shared.target.lock() = target;
        self.shared.machine.lock().target_changed();
        self.shared.emit(AutoCaptureEvent::StateChanged(AutoCaptureState::Waiting));
    }
}

impl Drop for AutoCaptureRunner {
    fn drop(&mut self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
        self.shared.machine.lock().teardown();
    }
}

async fn run_loop(shared: Arc<Shared>, token: CancellationToken, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let decision = shared.machine.lock().on_tick();
        match decision {
            TickDecision::Sample(ticket) => {
                tokio::spawn(sample(shared.clone(), ticket, token.clone()));
            }
            TickDecision::Skip(SkipReason::InFlight) => {
                debug!("Tick skipped: sample in flight");
            }
            TickDecision::Skip(SkipReason::Disabled) => break,
        }
    }

    debug!("Auto-capture loop exited");
}

async fn sample(shared: Arc<Shared>, ticket: SampleTicket, token: CancellationToken) {
    let _guard = FinishGuard {
        shared: shared.clone(),
        ticket,
    };

    let frame = match shared.source.latest_frame() {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            shared.machine.lock().on_capture_skipped(ticket);
            return;
        }
        Err(e) => {
            camera_failed(&shared, ticket, &token, e);
            return;
        }
    };

    let target = shared.target.lock().clone();
    let progress_shared = shared.clone();
    let on_progress: PercentCallback = Arc::new(move |pct| {
        progress_shared.emit_current(ticket, AutoCaptureEvent::Progress(pct));
    });

    let raw_text = match shared.pipeline.sample(&frame, &target, Some(on_progress)).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            shared.machine.lock().on_capture_skipped(ticket);
            return;
        }
        Err(e) => {
            let current = {
                let mut machine = shared.machine.lock();
                let current = machine.on_failed(ticket);
                if current {
                    let _ = shared
                        .events
                        .send(AutoCaptureEvent::RecognitionFailed(e.to_string()));
                }
                current
            };
            if current {
                warn!("Auto-capture recognition failed: {}", e);
            }
            return;
        }
    };

    let observation = if shared.pipeline.is_waiting(&raw_text) {
        Observation::Waiting
    } else {
        Observation::Matched(shared.pipeline.match_text(&raw_text))
    };

    let (previous, transition) = {
        let mut machine = shared.machine.lock();
        let previous = machine.state();
        (previous, machine.on_recognized(ticket, observation))
    };

    match transition {
        Transition::Waiting => {
            if previous != AutoCaptureState::Waiting {
                shared.emit_current(ticket, AutoCaptureEvent::StateChanged(AutoCaptureState::Waiting));
            }
            shared.emit_current(ticket, AutoCaptureEvent::Waiting { raw_text });
        }
        Transition::Lock(pair) => {
            shared.emit_current(ticket, AutoCaptureEvent::StateChanged(AutoCaptureState::Locked));
            let created = shared
                .store
                .create_record(&target.table_key, &pair.group.skill, &pair.series.skill)
                .await;
            match created {
                Ok(record) => {
                    let position = record.position;
                    let delivered = shared.emit_current(
                        ticket,
                        AutoCaptureEvent::Locked {
                            pair: pair.clone(),
                            raw_text,
                            record,
                        },
                    );
                    if delivered {
                        info!(
                            "Locked '{}' / '{}' as record #{}",
                            pair.series.skill, pair.group.skill, position
                        );
                    } else {
                        debug!("Record #{} created after auto-capture stopped", position);
                    }
                }
                Err(e) => {
                    let unlocked = {
                        let mut machine = shared.machine.lock();
                        let unlocked = machine.on_record_failed(ticket);
                        if unlocked {
                            let _ = shared.events.send(AutoCaptureEvent::RecordFailed(e.to_string()));
                            let _ = shared
                                .events
                                .send(AutoCaptureEvent::StateChanged(AutoCaptureState::Waiting));
                        }
                        unlocked
                    };
                    if unlocked {
                        error!("Failed to create record, waiting for the next match: {}", e);
                    } else {
                        debug!("Record creation failed after auto-capture stopped: {}", e);
                    }
                }
            }
        }
        Transition::Weak(pair) => {
            debug!(
                "Unconfident match: series {} ({}), group {} ({})",
                pair.series.skill, pair.series.score, pair.group.skill, pair.group.score
            );
            shared.emit_current(ticket, AutoCaptureEvent::Unconfident { pair, raw_text });
        }
        Transition::Ignored => debug!("Already locked; match ignored"),
        Transition::Stale => debug!("Discarding result from a previous activation"),
    }
}

fn camera_failed(shared: &Shared, ticket: SampleTicket, token: &CancellationToken, err: CameraError) {
    let current = {
        let mut machine = shared.machine.lock();
        let current = machine.on_failed(ticket);
        if current {
            machine.disable();
        }
        current
    };

    if current {
        error!("Camera error, stopping auto-capture: {}", err);
        token.cancel();
        shared.emit(AutoCaptureEvent::CameraError(err.to_string()));
        shared.emit(AutoCaptureEvent::Running(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{DeviceInfo, VideoFrame};
    use crate::pipeline::tests::{target, vocabularies, white_frame};
    use crate::storage::{MemoryRecordStore, RecordError, RecordRef};
    use crate::vision::ocr::testing::ScriptedFactory;
    use crate::vision::RecognitionAdapter;
    use async_trait::async_trait;
    use crossbeam_channel::{unbounded, Receiver};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Rejects the first `failures` creations, then delegates
    struct FlakyStore {
        inner: Arc<MemoryRecordStore>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn create_record(
            &self,
            table_key: &str,
            group: &str,
            series: &str,
        ) -> Result<RecordRef, RecordError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(RecordError::Rejected("store offline".to_string()));
            }
            self.inner.create_record(table_key, group, series).await
        }

        async fn update_record(
            &self,
            table_key: &str,
            id: &str,
            group: &str,
            series: &str,
        ) -> Result<(), RecordError> {
            self.inner.update_record(table_key, id, group, series).await
        }
    }

    struct StaticSource {
        frame: VideoFrame,
        error: Option<CameraError>,
    }

    #[async_trait]
    impl FrameSource for StaticSource {
        async fn devices(&self) -> Result<Vec<DeviceInfo>, CameraError> {
            Ok(vec![])
        }

        async fn start(&self, _device_id: Option<&str>) -> Result<(), CameraError> {
            Ok(())
        }

        async fn stop(&self) {}

        fn latest_frame(&self) -> Result<Option<VideoFrame>, CameraError> {
            match &self.error {
                Some(e) => Err(e.clone()),
                None => Ok(Some(self.frame.clone())),
            }
        }
    }

    struct Harness {
        runner: AutoCaptureRunner,
        store: Arc<MemoryRecordStore>,
        events: Receiver<AutoCaptureEvent>,
    }

    fn harness(factory: ScriptedFactory, error: Option<CameraError>) -> Harness {
        harness_with_failures(factory, error, 0)
    }

    fn harness_with_failures(
        factory: ScriptedFactory,
        error: Option<CameraError>,
        failures: usize,
    ) -> Harness {
        let adapter = Arc::new(RecognitionAdapter::new(Arc::new(factory)));
        let pipeline = Arc::new(ScanPipeline::new(adapter, vocabularies()));
        let source = Arc::new(StaticSource {
            frame: white_frame(),
            error,
        });
        let store = Arc::new(MemoryRecordStore::new());
        let flaky = Arc::new(FlakyStore {
            inner: store.clone(),
            failures: AtomicUsize::new(failures),
        });
        let (tx, rx) = unbounded();

        let runner = AutoCaptureRunner::new(pipeline, source, flaky, target(), tx)
            .with_interval(Duration::from_millis(10));

        Harness {
            runner,
            store,
            events: rx,
        }
    }

    fn drain(events: &Receiver<AutoCaptureEvent>) -> Vec<AutoCaptureEvent> {
        events.try_iter().collect()
    }

    #[tokio::test]
    async fn test_samples_never_overlap() {
        let factory = ScriptedFactory::texts(&["????? ?????"], Duration::from_millis(60));
        let stats = factory.stats.clone();
        let h = harness(factory, None);

        h.runner.start();
        tokio::time::sleep(Duration::from_millis(300)).await;
        h.runner.stop();

        assert!(stats.recognitions.load(Ordering::SeqCst) >= 2);
        assert_eq!(stats.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_record_created_once_per_lock() {
        let factory = ScriptedFactory::texts(&["鎧竜の守護 ヌシの誇り"], Duration::from_millis(2));
        let stats = factory.stats.clone();
        let h = harness(factory, None);

        h.runner.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        h.runner.stop();

        assert!(stats.recognitions.load(Ordering::SeqCst) > 1);
        assert_eq!(h.store.len(), 1);
        assert_eq!(h.runner.state(), AutoCaptureState::Locked);

        let records = h.store.records("table");
        assert_eq!(records[0].series, "鎧竜の守護");
        assert_eq!(records[0].group, "ヌシの誇り");

        let locked: Vec<_> = drain(&h.events)
            .into_iter()
            .filter(|e| matches!(e, AutoCaptureEvent::Locked { .. }))
            .collect();
        assert_eq!(locked.len(), 1);
        if let AutoCaptureEvent::Locked { raw_text, record, .. } = &locked[0] {
            assert_eq!(raw_text, "鎧竜の守護 ヌシの誇り");
            assert_eq!(record.position, 1);
        }
    }

    #[tokio::test]
    async fn test_placeholder_then_result() {
        let factory = ScriptedFactory::texts(
            &["????? ?????", "????? ?????", "鎧竜の守護 ヌシの誇り"],
            Duration::from_millis(2),
        );
        let h = harness(factory, None);

        h.runner.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        h.runner.stop();

        let events = drain(&h.events);
        let waiting = events
            .iter()
            .filter(|e| matches!(e, AutoCaptureEvent::Waiting { .. }))
            .count();
        let first_lock = events
            .iter()
            .position(|e| matches!(e, AutoCaptureEvent::Locked { .. }));
        let first_wait = events
            .iter()
            .position(|e| matches!(e, AutoCaptureEvent::Waiting { .. }));

        assert_eq!(waiting, 2);
        assert!(first_wait < first_lock);
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn test_new_target_locks_again() {
        let factory = ScriptedFactory::texts(&["鎧竜の守護 ヌシの誇り"], Duration::from_millis(2));
        let h = harness(factory, None);

        h.runner.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.store.len(), 1);

        let mut next = target();
        next.table_key = "other".to_string();
        h.runner.set_target(next);
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.runner.stop();

        assert_eq!(h.store.records("table").len(), 1);
        assert_eq!(h.store.records("other").len(), 1);
    }

    #[tokio::test]
    async fn test_recognition_failure_is_transient() {
        let mut factory = ScriptedFactory::texts(&[], Duration::from_millis(2));
        factory.script = vec![
            Err("engine crashed".to_string()),
            Ok("鎧竜の守護 ヌシの誇り".to_string()),
        ];
        let h = harness(factory, None);

        h.runner.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        h.runner.stop();

        let events = drain(&h.events);
        assert!(events
            .iter()
            .any(|e| matches!(e, AutoCaptureEvent::RecognitionFailed(_))));
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn test_camera_error_stops_loop_once() {
        let factory = ScriptedFactory::texts(&["x"], Duration::from_millis(2));
        let stats = factory.stats.clone();
        let h = harness(factory, Some(CameraError::AccessDenied));

        h.runner.start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let camera_errors = drain(&h.events)
            .into_iter()
            .filter(|e| matches!(e, AutoCaptureEvent::CameraError(_)))
            .count();
        assert_eq!(camera_errors, 1);
        assert!(!h.runner.is_running());
        assert_eq!(stats.recognitions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_discards_in_flight_result() {
        let factory = ScriptedFactory::texts(&["鎧竜の守護 ヌシの誇り"], Duration::from_millis(80));
        let h = harness(factory, None);

        h.runner.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.runner.stop();

        let before = drain(&h.events);
        assert!(matches!(before.last(), Some(AutoCaptureEvent::Running(false))));

        tokio::time::sleep(Duration::from_millis(150)).await;

        let after = drain(&h.events);
        assert!(after.is_empty(), "events after stop: {:?}", after);
        assert!(h.store.is_empty());
        assert_eq!(h.runner.state(), AutoCaptureState::Waiting);
    }

    #[tokio::test]
    async fn test_record_failure_retries_on_next_match() {
        let factory = ScriptedFactory::texts(&["鎧竜の守護 ヌシの誇り"], Duration::from_millis(2));
        let h = harness_with_failures(factory, None, 1);

        h.runner.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        h.runner.stop();

        let events = drain(&h.events);
        let failed = events
            .iter()
            .filter(|e| matches!(e, AutoCaptureEvent::RecordFailed(_)))
            .count();
        let locked = events
            .iter()
            .filter(|e| matches!(e, AutoCaptureEvent::Locked { .. }))
            .count();

        assert_eq!(failed, 1);
        assert_eq!(locked, 1);
        assert_eq!(h.store.len(), 1);
        assert_eq!(h.runner.state(), AutoCaptureState::Locked);
    }
}
