use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, select, Receiver, Sender};

use crate::camera::domain::media_device::FrameSource;
use crate::detection::domain::face_detector::{DetectorOptions, FaceDetector};
use crate::presence::gate_signals::{DetectionSnapshot, GateSignals};

/// Display-synchronized face presence loop.
///
/// One worker thread waits for a display tick, reads the current frame and
/// runs detection on it. Detection is synchronous inside the loop, so ticks
/// that arrive while a pass is running coalesce and passes never overlap.
/// Frames the camera cannot decode yet are skipped without calling the
/// detector. A failed pass is logged and the previous face count stands.
pub struct PresenceGate {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PresenceGate {
    pub fn start(
        frames: Arc<dyn FrameSource>,
        mut detector: Box<dyn FaceDetector>,
        options: DetectorOptions,
        signals: Arc<GateSignals>,
        ticks: Receiver<Instant>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let handle = thread::spawn(move || {
            run_loop(
                frames.as_ref(),
                detector.as_mut(),
                &options,
                &signals,
                &ticks,
                &shutdown_rx,
            );
            log::debug!("Presence loop exited");
        });
        Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops scheduling passes and waits for the loop thread to exit.
    /// A pass already running finishes first. Safe to call repeatedly.
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the shutdown channel.
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Presence loop panicked");
            }
        }
    }
}

impl Drop for PresenceGate {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    frames: &dyn FrameSource,
    detector: &mut dyn FaceDetector,
    options: &DetectorOptions,
    signals: &GateSignals,
    ticks: &Receiver<Instant>,
    shutdown: &Receiver<()>,
) {
    loop {
        select! {
            recv(shutdown) -> _ => return,
            recv(ticks) -> tick => {
                if tick.is_err() {
                    return;
                }
            }
        }
        if signals.is_torn_down() {
            return;
        }

        frames.advance();
        let Some(frame) = frames.current_frame() else {
            continue;
        };

        match detector.detect(&frame, options) {
            Ok(faces) => {
                log::trace!("Frame {}: {} face(s)", frame.sequence(), faces.len());
                if !signals.record_snapshot(DetectionSnapshot::now(faces.len())) {
                    return;
                }
            }
            Err(e) => log::warn!("Face detection pass failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::face_detector::DetectorError;
    use crate::shared::face_box::FaceBox;
    use crate::shared::frame::Frame;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticFrames {
        available: AtomicBool,
        advances: AtomicUsize,
    }

    impl StaticFrames {
        fn new(available: bool) -> Arc<Self> {
            Arc::new(Self {
                available: AtomicBool::new(available),
                advances: AtomicUsize::new(0),
            })
        }
    }

    impl FrameSource for StaticFrames {
        fn current_frame(&self) -> Option<Frame> {
            self.available
                .load(Ordering::SeqCst)
                .then(|| Frame::filled(8, 8, [0, 0, 0], 0))
        }

        fn advance(&self) {
            self.advances.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Returns scripted face counts; repeats the last entry once exhausted.
    struct ScriptedDetector {
        script: Vec<Result<usize, DetectorError>>,
        calls: Arc<AtomicUsize>,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl ScriptedDetector {
        fn new(script: Vec<Result<usize, DetectorError>>) -> Self {
            Self {
                script,
                calls: Arc::new(AtomicUsize::new(0)),
                active: Arc::new(AtomicUsize::new(0)),
                max_active: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
            }
        }
    }

    impl FaceDetector for ScriptedDetector {
        fn detect(
            &mut self,
            _frame: &Frame,
            _options: &DetectorOptions,
        ) -> Result<Vec<FaceBox>, DetectorError> {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);

            let idx = call.min(self.script.len() - 1);
            self.script[idx]
                .clone()
                .map(|n| vec![FaceBox::new(0.0, 0.0, 1.0, 1.0, 0.9); n])
        }
    }

    fn wait_for(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_tick_publishes_face_count() {
        let signals = Arc::new(GateSignals::new());
        let detector = ScriptedDetector::new(vec![Ok(1)]);
        let calls = detector.calls.clone();
        let (tick_tx, tick_rx) = unbounded();
        let mut gate = PresenceGate::start(
            StaticFrames::new(true),
            Box::new(detector),
            DetectorOptions::default(),
            signals.clone(),
            tick_rx,
        );

        tick_tx.send(Instant::now()).unwrap();
        wait_for(|| calls.load(Ordering::SeqCst) == 1);
        wait_for(|| signals.latest_snapshot().is_some());

        assert_eq!(signals.face_count(), 1);
        gate.stop();
    }

    #[test]
    fn test_each_tick_advances_frames_once() {
        let signals = Arc::new(GateSignals::new());
        let detector = ScriptedDetector::new(vec![Ok(1)]);
        let calls = detector.calls.clone();
        let frames = StaticFrames::new(true);
        let (tick_tx, tick_rx) = unbounded();
        let mut gate = PresenceGate::start(
            frames.clone(),
            Box::new(detector),
            DetectorOptions::default(),
            signals,
            tick_rx,
        );

        for expected in 1..=3 {
            tick_tx.send(Instant::now()).unwrap();
            wait_for(|| calls.load(Ordering::SeqCst) == expected);
        }
        gate.stop();

        assert_eq!(frames.advances.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unready_frame_skips_detector() {
        let signals = Arc::new(GateSignals::new());
        let detector = ScriptedDetector::new(vec![Ok(1)]);
        let calls = detector.calls.clone();
        let frames = StaticFrames::new(false);
        let (tick_tx, tick_rx) = unbounded();
        let mut gate = PresenceGate::start(
            frames.clone(),
            Box::new(detector),
            DetectorOptions::default(),
            signals.clone(),
            tick_rx,
        );

        for _ in 0..5 {
            tick_tx.send(Instant::now()).unwrap();
        }
        wait_for(|| tick_tx.is_empty());
        thread::sleep(Duration::from_millis(20));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(signals.latest_snapshot().is_none());

        frames.available.store(true, Ordering::SeqCst);
        tick_tx.send(Instant::now()).unwrap();
        wait_for(|| calls.load(Ordering::SeqCst) == 1);
        gate.stop();
    }

    #[test]
    fn test_detector_error_keeps_previous_count() {
        let signals = Arc::new(GateSignals::new());
        let detector = ScriptedDetector::new(vec![
            Ok(1),
            Err(DetectorError::Inference("boom".into())),
        ]);
        let calls = detector.calls.clone();
        let (tick_tx, tick_rx) = unbounded();
        let mut gate = PresenceGate::start(
            StaticFrames::new(true),
            Box::new(detector),
            DetectorOptions::default(),
            signals.clone(),
            tick_rx,
        );

        tick_tx.send(Instant::now()).unwrap();
        wait_for(|| calls.load(Ordering::SeqCst) == 1);
        wait_for(|| signals.latest_snapshot().is_some());
        tick_tx.send(Instant::now()).unwrap();
        tick_tx.send(Instant::now()).unwrap();
        wait_for(|| calls.load(Ordering::SeqCst) == 3);

        gate.stop();
        assert_eq!(signals.face_count(), 1);
        assert!(gate.handle.is_none());
    }

    #[test]
    fn test_passes_never_overlap() {
        let signals = Arc::new(GateSignals::new());
        let mut detector = ScriptedDetector::new(vec![Ok(1)]);
        detector.delay = Duration::from_millis(15);
        let calls = detector.calls.clone();
        let max_active = detector.max_active.clone();
        let mut gate = PresenceGate::start(
            StaticFrames::new(true),
            Box::new(detector),
            DetectorOptions::default(),
            signals,
            crossbeam_channel::tick(Duration::from_millis(1)),
        );

        wait_for(|| calls.load(Ordering::SeqCst) >= 4);
        gate.stop();

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_teardown_during_pass_discards_result() {
        let signals = Arc::new(GateSignals::new());
        let mut detector = ScriptedDetector::new(vec![Ok(0), Ok(2)]);
        detector.delay = Duration::from_millis(50);
        let calls = detector.calls.clone();
        let (tick_tx, tick_rx) = unbounded();
        let mut gate = PresenceGate::start(
            StaticFrames::new(true),
            Box::new(detector),
            DetectorOptions::default(),
            signals.clone(),
            tick_rx,
        );

        tick_tx.send(Instant::now()).unwrap();
        wait_for(|| signals.latest_snapshot().is_some());
        tick_tx.send(Instant::now()).unwrap();
        wait_for(|| calls.load(Ordering::SeqCst) == 2);
        signals.tear_down();
        gate.stop();

        assert_eq!(signals.face_count(), 0);
    }

    #[test]
    fn test_stop_is_idempotent_and_ends_loop() {
        let signals = Arc::new(GateSignals::new());
        let (_tick_tx, tick_rx) = unbounded::<Instant>();
        let mut gate = PresenceGate::start(
            StaticFrames::new(true),
            Box::new(ScriptedDetector::new(vec![Ok(1)])),
            DetectorOptions::default(),
            signals,
            tick_rx,
        );

        assert!(gate.is_running());
        gate.stop();
        gate.stop();
        assert!(!gate.is_running());
    }

    #[test]
    fn test_closed_tick_source_ends_loop() {
        let signals = Arc::new(GateSignals::new());
        let (tick_tx, tick_rx) = unbounded::<Instant>();
        let gate = PresenceGate::start(
            StaticFrames::new(true),
            Box::new(ScriptedDetector::new(vec![Ok(1)])),
            DetectorOptions::default(),
            signals,
            tick_rx,
        );

        drop(tick_tx);
        wait_for(|| !gate.is_running());
    }
}
