use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use thiserror::Error;

use crate::auth::auth_session::AuthSession;
use crate::camera::domain::media_device::{
    CameraConstraints, CameraError, FrameSource, MediaDevices,
};
use crate::camera::frame_pump::FramePump;
use crate::capture::capture_controller::{CaptureController, CaptureError};
use crate::detection::domain::face_detector::DetectorOptions;
use crate::detection::domain::model_loader::{ModelLoadError, ModelLoader};
use crate::detection::infrastructure::timed_face_detector::TimedFaceDetector;
use crate::flow::notifier::{Notice, Notifier};
use crate::presence::gate_signals::{GateSignals, GateStatus};
use crate::presence::presence_gate::PresenceGate;
use crate::shared::constants::{
    CAMERA_READY_TIMEOUT, DETECTOR_TIMEOUT, DISPLAY_REFRESH_INTERVAL, SUCCESS_GRACE_DELAY,
};
use crate::shared::settings::Settings;
use crate::verification::domain::face_backend::FaceBackend;
use crate::verification::domain::identity::SessionIdentity;
use crate::verification::domain::navigator::Navigator;
use crate::verification::verification_session::{
    AttemptKind, SessionError, SessionState, VerificationSession,
};

#[derive(Error, Debug)]
pub enum ScreenError {
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Collaborators shared by every screen instance.
#[derive(Clone)]
pub struct ScreenContext {
    pub devices: Arc<dyn MediaDevices>,
    pub backend: Arc<dyn FaceBackend>,
    pub navigator: Arc<dyn Navigator>,
    pub notifier: Arc<dyn Notifier>,
    pub auth: Option<Arc<AuthSession>>,
}

#[derive(Debug, Clone, Copy)]
pub struct ScreenOptions {
    pub camera: CameraConstraints,
    pub detector: DetectorOptions,
    pub camera_ready_timeout: Duration,
    pub detector_timeout: Duration,
    pub grace_delay: Duration,
    pub tick_interval: Duration,
}

impl Default for ScreenOptions {
    fn default() -> Self {
        Self {
            camera: CameraConstraints::default(),
            detector: DetectorOptions::default(),
            camera_ready_timeout: CAMERA_READY_TIMEOUT,
            detector_timeout: DETECTOR_TIMEOUT,
            grace_delay: SUCCESS_GRACE_DELAY,
            tick_interval: DISPLAY_REFRESH_INTERVAL,
        }
    }
}

impl From<&Settings> for ScreenOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            camera: settings.camera,
            detector: settings.detector,
            camera_ready_timeout: settings.camera_ready_timeout(),
            detector_timeout: settings.detector_timeout(),
            grace_delay: settings.grace_delay(),
            tick_interval: DISPLAY_REFRESH_INTERVAL,
        }
    }
}

/// What the screen shows the user right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenStatus {
    Gate(GateStatus),
    Success {
        kind: AttemptKind,
        confidence: Option<u32>,
    },
    Failure {
        confidence: Option<u32>,
        message: String,
    },
}

impl fmt::Display for ScreenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScreenStatus::Gate(status) => write!(f, "{status}"),
            ScreenStatus::Success {
                kind: AttemptKind::Enroll,
                ..
            } => write!(f, "Face registered"),
            ScreenStatus::Success {
                confidence: Some(c),
                ..
            } => write!(f, "Face verified ({c}% confidence)"),
            ScreenStatus::Success { .. } => write!(f, "Face verified"),
            ScreenStatus::Failure {
                confidence: Some(c),
                ..
            } => write!(f, "Verification failed ({c}% confidence)"),
            ScreenStatus::Failure { message, .. } => write!(f, "Failed: {message}"),
        }
    }
}

/// One mounted enroll or verify screen.
///
/// Mounting checks the identity and sign-in, loads the models, starts the camera and
/// then the presence loop. Teardown runs in the reverse order: signals are
/// frozen, the loop stops, the camera is released, then the session cancels
/// whatever is pending. Dropping the screen tears it down.
pub struct FaceScreen {
    signals: Arc<GateSignals>,
    pump: Arc<FramePump>,
    gate: PresenceGate,
    controller: CaptureController,
    session: VerificationSession,
    dimensions: (u32, u32),
    torn_down: bool,
}

impl FaceScreen {
    pub fn mount(
        kind: AttemptKind,
        identity: Option<SessionIdentity>,
        models: &dyn ModelLoader,
        context: &ScreenContext,
        options: &ScreenOptions,
    ) -> Result<Self, ScreenError> {
        let ticks = crossbeam_channel::tick(options.tick_interval);
        Self::mount_with_ticks(kind, identity, models, context, options, ticks)
    }

    /// Like [`mount`](Self::mount) but driven by the given tick source.
    pub fn mount_with_ticks(
        kind: AttemptKind,
        identity: Option<SessionIdentity>,
        models: &dyn ModelLoader,
        context: &ScreenContext,
        options: &ScreenOptions,
        ticks: Receiver<Instant>,
    ) -> Result<Self, ScreenError> {
        let signals = Arc::new(GateSignals::new());
        let mut session = VerificationSession::new(
            kind,
            identity,
            context.backend.clone(),
            context.navigator.clone(),
            signals.clone(),
        )
        .with_notifier(context.notifier.clone())
        .with_grace_delay(options.grace_delay);
        if let Some(auth) = &context.auth {
            session = session.with_auth(auth.clone());
        }
        session.ensure_identity()?;
        session.ensure_signed_in()?;

        log::info!("Loading face detection models...");
        let detector = models.load().map_err(|e| {
            context.notifier.notify(Notice::error(
                "Error",
                "Failed to load face detection models",
            ));
            e
        })?;
        signals.set_models_ready(true);
        let detector = TimedFaceDetector::new(detector, options.detector_timeout);

        let pump = Arc::new(
            FramePump::new(context.devices.clone()).with_ready_timeout(options.camera_ready_timeout),
        );
        let dimensions = pump.start(&options.camera).map_err(|e| {
            context
                .notifier
                .notify(Notice::error("Camera Error", e.to_string()));
            e
        })?;
        signals.set_camera_ready(true);

        let frames: Arc<dyn FrameSource> = pump.clone();
        let gate = PresenceGate::start(
            frames.clone(),
            Box::new(detector),
            options.detector,
            signals.clone(),
            ticks,
        );
        let controller = CaptureController::new(frames, signals.clone());

        log::info!("{kind:?} screen mounted ({}x{})", dimensions.0, dimensions.1);
        Ok(Self {
            signals,
            pump,
            gate,
            controller,
            session,
            dimensions,
            torn_down: false,
        })
    }

    /// Captures a still if the gate allows it and submits it.
    pub fn capture(&self) -> Result<(), ScreenError> {
        let still = self.controller.capture()?;
        self.session.capture(still)?;
        Ok(())
    }

    pub fn retry(&self) -> Result<(), ScreenError> {
        Ok(self.session.retry()?)
    }

    pub fn abandon(&self) -> Result<(), ScreenError> {
        Ok(self.session.abandon()?)
    }

    pub fn status(&self) -> ScreenStatus {
        match self.session.state() {
            SessionState::Success { confidence } => ScreenStatus::Success {
                kind: self.session.kind(),
                confidence,
            },
            SessionState::Failure {
                confidence,
                message,
            } => ScreenStatus::Failure {
                confidence,
                message,
            },
            SessionState::Idle | SessionState::Submitting => {
                ScreenStatus::Gate(self.signals.status())
            }
        }
    }

    pub fn capture_allowed(&self) -> bool {
        self.signals.allowed()
    }

    pub fn signals(&self) -> &GateSignals {
        &self.signals
    }

    pub fn session(&self) -> &VerificationSession {
        &self.session
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    pub fn camera_active(&self) -> bool {
        self.pump.is_ready()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.signals.tear_down();
        self.gate.stop();
        self.pump.stop();
        self.session.teardown();
        log::info!("{:?} screen torn down", self.session.kind());
    }
}

impl Drop for FaceScreen {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        assert_eq!(
            ScreenStatus::Gate(GateStatus::NoFace).to_string(),
            "No face detected"
        );
        assert_eq!(
            ScreenStatus::Success {
                kind: AttemptKind::Verify,
                confidence: Some(92)
            }
            .to_string(),
            "Face verified (92% confidence)"
        );
        assert_eq!(
            ScreenStatus::Success {
                kind: AttemptKind::Enroll,
                confidence: None
            }
            .to_string(),
            "Face registered"
        );
        assert_eq!(
            ScreenStatus::Failure {
                confidence: Some(40),
                message: "Face not recognized".into()
            }
            .to_string(),
            "Verification failed (40% confidence)"
        );
        assert_eq!(
            ScreenStatus::Failure {
                confidence: None,
                message: "network error: refused".into()
            }
            .to_string(),
            "Failed: network error: refused"
        );
    }

    #[test]
    fn test_options_follow_settings() {
        let settings = Settings {
            grace_delay_ms: 10,
            detector_timeout_ms: 300,
            ..Settings::default()
        };
        let options = ScreenOptions::from(&settings);
        assert_eq!(options.grace_delay, Duration::from_millis(10));
        assert_eq!(options.detector_timeout, Duration::from_millis(300));
        assert_eq!(options.tick_interval, DISPLAY_REFRESH_INTERVAL);
    }
}
