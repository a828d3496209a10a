use std::sync::Arc;

use thiserror::Error;

use crate::camera::domain::media_device::FrameSource;
use crate::capture::still_image::StillImage;
use crate::presence::gate_signals::{GateSignals, GateStatus};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture not allowed: {0}")]
    NotAllowed(GateStatus),
    #[error("no camera frame available")]
    NoFrame,
    #[error("failed to encode still image: {0}")]
    Encode(#[from] image::ImageError),
}

/// Freezes the current camera frame into a [`StillImage`], but only when the
/// gate allows it at the instant of the call. Never retries.
pub struct CaptureController {
    frames: Arc<dyn FrameSource>,
    signals: Arc<GateSignals>,
}

impl CaptureController {
    pub fn new(frames: Arc<dyn FrameSource>, signals: Arc<GateSignals>) -> Self {
        Self { frames, signals }
    }

    pub fn capture(&self) -> Result<StillImage, CaptureError> {
        if !self.signals.allowed() {
            return Err(CaptureError::NotAllowed(self.signals.status()));
        }
        let frame = self.frames.current_frame().ok_or(CaptureError::NoFrame)?;
        let still = StillImage::encode(&frame)?;
        log::debug!(
            "Captured frame {} ({} bytes)",
            still.sequence(),
            still.jpeg().len()
        );
        Ok(still)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::gate_signals::DetectionSnapshot;
    use crate::shared::frame::Frame;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFrames {
        reads: AtomicUsize,
        available: bool,
    }

    impl FrameSource for CountingFrames {
        fn current_frame(&self) -> Option<Frame> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.available.then(|| Frame::filled(32, 24, [90, 90, 90], 3))
        }
    }

    fn frames(available: bool) -> Arc<CountingFrames> {
        Arc::new(CountingFrames {
            reads: AtomicUsize::new(0),
            available,
        })
    }

    fn signals(faces: usize, in_flight: bool) -> Arc<GateSignals> {
        let signals = Arc::new(GateSignals::new());
        signals.set_camera_ready(true);
        signals.set_models_ready(true);
        signals.set_attempt_in_flight(in_flight);
        signals.record_snapshot(DetectionSnapshot::now(faces));
        signals
    }

    #[test]
    fn test_capture_when_allowed() {
        let controller = CaptureController::new(frames(true), signals(1, false));
        let still = controller.capture().unwrap();
        assert_eq!(still.sequence(), 3);
        assert_eq!((still.width(), still.height()), (32, 24));
    }

    #[test]
    fn test_capture_refused_without_reading_frame() {
        for (faces, in_flight) in [(0, false), (2, false), (1, true)] {
            let source = frames(true);
            let signals = signals(faces, in_flight);
            let before = signals.inputs();
            let controller = CaptureController::new(source.clone(), signals.clone());

            let err = controller.capture().unwrap_err();

            assert!(matches!(err, CaptureError::NotAllowed(_)));
            assert_eq!(source.reads.load(Ordering::SeqCst), 0);
            assert_eq!(signals.inputs(), before);
        }
    }

    #[test]
    fn test_capture_reports_missing_frame() {
        let controller = CaptureController::new(frames(false), signals(1, false));
        assert!(matches!(controller.capture(), Err(CaptureError::NoFrame)));
    }

    #[test]
    fn test_not_allowed_message_carries_status() {
        let controller = CaptureController::new(frames(true), signals(3, false));
        let err = controller.capture().unwrap_err();
        assert_eq!(
            err.to_string(),
            "capture not allowed: 3 faces detected - Only one face allowed"
        );
    }
}
