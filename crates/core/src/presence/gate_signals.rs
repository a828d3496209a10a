use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// One detection pass result. Only the latest snapshot is ever kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionSnapshot {
    pub face_count: usize,
    pub taken_at: Instant,
}

impl DetectionSnapshot {
    pub fn now(face_count: usize) -> Self {
        Self {
            face_count,
            taken_at: Instant::now(),
        }
    }
}

/// Inputs to the capture decision for one screen instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateInputs {
    pub camera_ready: bool,
    pub models_ready: bool,
    pub face_count: usize,
    pub attempt_in_flight: bool,
    /// The current attempt has a result. It stays in flight for the capture
    /// decision until the session resets it, so this only affects status.
    pub attempt_resolved: bool,
}

impl GateInputs {
    /// Capture is allowed only with a ready camera and models, exactly one
    /// face in view, and no attempt already submitting.
    pub fn capture_allowed(&self) -> bool {
        self.camera_ready && self.models_ready && self.face_count == 1 && !self.attempt_in_flight
    }
}

/// User-facing status line for the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStatus {
    LoadingModels,
    StartingCamera,
    NoFace,
    MultipleFaces(usize),
    Ready,
    Verifying,
    AttemptComplete,
    Closed,
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateStatus::LoadingModels => write!(f, "Loading face detection models..."),
            GateStatus::StartingCamera => write!(f, "Starting camera..."),
            GateStatus::NoFace => write!(f, "No face detected"),
            GateStatus::MultipleFaces(n) => {
                write!(f, "{n} faces detected - Only one face allowed")
            }
            GateStatus::Ready => write!(f, "Face detected - Ready to capture"),
            GateStatus::Verifying => write!(f, "Verifying your identity..."),
            GateStatus::AttemptComplete => write!(f, "Attempt complete"),
            GateStatus::Closed => write!(f, "Camera closed"),
        }
    }
}

#[derive(Debug, Default)]
struct SignalState {
    inputs: GateInputs,
    latest: Option<DetectionSnapshot>,
    torn_down: bool,
}

/// Explicit per-screen state shared by the gate, the capture controller and
/// the verification session.
///
/// The presence gate is the only writer of the face count. Every write is
/// refused once [`GateSignals::tear_down`] has run, and teardown takes the
/// same lock as the writes, so nothing lands after it returns.
#[derive(Debug, Default)]
pub struct GateSignals {
    state: Mutex<SignalState>,
    changed: Condvar,
}

impl GateSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_camera_ready(&self, ready: bool) -> bool {
        self.update(|inputs| inputs.camera_ready = ready)
    }

    pub fn set_models_ready(&self, ready: bool) -> bool {
        self.update(|inputs| inputs.models_ready = ready)
    }

    pub fn set_attempt_in_flight(&self, in_flight: bool) -> bool {
        self.update(|inputs| inputs.attempt_in_flight = in_flight)
    }

    pub fn set_attempt_resolved(&self, resolved: bool) -> bool {
        self.update(|inputs| inputs.attempt_resolved = resolved)
    }

    /// Publishes a detection result. Returns `false`, leaving state untouched,
    /// if the screen has been torn down.
    pub fn record_snapshot(&self, snapshot: DetectionSnapshot) -> bool {
        let mut state = self.lock();
        if state.torn_down {
            return false;
        }
        state.inputs.face_count = snapshot.face_count;
        state.latest = Some(snapshot);
        self.changed.notify_all();
        true
    }

    pub fn tear_down(&self) {
        let mut state = self.lock();
        state.torn_down = true;
        self.changed.notify_all();
    }

    pub fn is_torn_down(&self) -> bool {
        self.lock().torn_down
    }

    pub fn inputs(&self) -> GateInputs {
        self.lock().inputs
    }

    pub fn face_count(&self) -> usize {
        self.lock().inputs.face_count
    }

    pub fn latest_snapshot(&self) -> Option<DetectionSnapshot> {
        self.lock().latest
    }

    pub fn allowed(&self) -> bool {
        let state = self.lock();
        !state.torn_down && state.inputs.capture_allowed()
    }

    pub fn status(&self) -> GateStatus {
        let state = self.lock();
        let inputs = state.inputs;
        if state.torn_down {
            GateStatus::Closed
        } else if !inputs.models_ready {
            GateStatus::LoadingModels
        } else if !inputs.camera_ready {
            GateStatus::StartingCamera
        } else if inputs.attempt_resolved {
            GateStatus::AttemptComplete
        } else if inputs.attempt_in_flight {
            GateStatus::Verifying
        } else {
            match inputs.face_count {
                0 => GateStatus::NoFace,
                1 => GateStatus::Ready,
                n => GateStatus::MultipleFaces(n),
            }
        }
    }

    /// Blocks until capture is allowed, the screen is torn down, or `timeout`
    /// elapses. Returns whether capture is allowed.
    pub fn wait_until_allowed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.torn_down {
                return false;
            }
            if state.inputs.capture_allowed() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            state = self
                .changed
                .wait_timeout(state, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    fn update(&self, apply: impl FnOnce(&mut GateInputs)) -> bool {
        let mut state = self.lock();
        if state.torn_down {
            return false;
        }
        apply(&mut state.inputs);
        self.changed.notify_all();
        true
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
