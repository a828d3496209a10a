use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{after, bounded, select, Sender};
use thiserror::Error;

use crate::auth::auth_session::AuthSession;
use crate::capture::still_image::StillImage;
use crate::flow::notifier::{Notice, Notifier, NullNotifier};
use crate::presence::gate_signals::GateSignals;
use crate::shared::constants::SUCCESS_GRACE_DELAY;
use crate::verification::domain::face_backend::{BackendError, FaceBackend, FaceVerification};
use crate::verification::domain::identity::SessionIdentity;
use crate::verification::domain::navigator::{
    Navigator, Route, NOTICE_IDENTITY_MISSING, NOTICE_LOGIN_REQUIRED,
    NOTICE_REGISTRATION_COMPLETE, NOTICE_VERIFICATION_FAILED,
};

/// Which backend operation a captured still is submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    /// Login-time check against the enrolled face.
    Verify,
    /// Registration-time enrollment of a new face.
    Enroll,
}

/// Confidence values are whole percentages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Submitting,
    Success {
        confidence: Option<u32>,
    },
    Failure {
        confidence: Option<u32>,
        message: String,
    },
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Success { .. } | SessionState::Failure { .. })
    }

    pub fn confidence(&self) -> Option<u32> {
        match self {
            SessionState::Success { confidence } | SessionState::Failure { confidence, .. } => {
                *confidence
            }
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("User information not found. Please log in again.")]
    MissingIdentity,
    #[error("Please log in to continue")]
    SignedOut,
    #[error("an attempt is already being submitted")]
    AlreadySubmitting,
    #[error("the current attempt has already resolved")]
    AttemptResolved,
    #[error("no failed attempt to act on")]
    NotFailed,
    #[error("session has been torn down")]
    TornDown,
}

enum Outcome {
    Verified(FaceVerification),
    Enrolled,
}

struct Attempt {
    state: SessionState,
    generation: u64,
    still: Option<StillImage>,
    navigated: bool,
    torn_down: bool,
    grace_cancel: Option<Sender<()>>,
    grace_timer: Option<JoinHandle<()>>,
}

struct Core {
    kind: AttemptKind,
    identity: Option<SessionIdentity>,
    backend: Arc<dyn FaceBackend>,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    signals: Arc<GateSignals>,
    auth: Option<Arc<AuthSession>>,
    grace_delay: Duration,
    attempt: Mutex<Attempt>,
    changed: Condvar,
}

/// State machine for one enroll-or-verify screen.
///
/// `Idle -> Submitting -> {Success, Failure}`, and `Failure -> Idle` only via
/// [`retry`](Self::retry). Each submission runs on its own worker thread and
/// is tagged with an attempt generation; results from a superseded attempt
/// or arriving after [`teardown`](Self::teardown) are dropped. On success a
/// single navigation fires after the grace delay unless teardown cancels it.
///
/// Navigation and notices are delivered while the session lock is held, so
/// `Navigator` and `Notifier` implementations must not call back into the
/// session.
pub struct VerificationSession {
    core: Arc<Core>,
}

impl VerificationSession {
    pub fn new(
        kind: AttemptKind,
        identity: Option<SessionIdentity>,
        backend: Arc<dyn FaceBackend>,
        navigator: Arc<dyn Navigator>,
        signals: Arc<GateSignals>,
    ) -> Self {
        Self {
            core: Arc::new(Core {
                kind,
                identity,
                backend,
                navigator,
                notifier: Arc::new(NullNotifier),
                signals,
                auth: None,
                grace_delay: SUCCESS_GRACE_DELAY,
                attempt: Mutex::new(Attempt {
                    state: SessionState::Idle,
                    generation: 0,
                    still: None,
                    navigated: false,
                    torn_down: false,
                    grace_cancel: None,
                    grace_timer: None,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.configure(|core| core.notifier = notifier);
        self
    }

    /// Auth session cleared by [`abandon`](Self::abandon).
    pub fn with_auth(mut self, auth: Arc<AuthSession>) -> Self {
        self.configure(|core| core.auth = Some(auth));
        self
    }

    pub fn with_grace_delay(mut self, delay: Duration) -> Self {
        self.configure(|core| core.grace_delay = delay);
        self
    }

    // Builders run before any worker holds a clone of the core.
    fn configure(&mut self, apply: impl FnOnce(&mut Core)) {
        if let Some(core) = Arc::get_mut(&mut self.core) {
            apply(core);
        }
    }

    pub fn kind(&self) -> AttemptKind {
        self.core.kind
    }

    pub fn identity(&self) -> Option<&SessionIdentity> {
        self.core.identity.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.core.lock().state.clone()
    }

    pub fn confidence(&self) -> Option<u32> {
        self.core.lock().state.confidence()
    }

    /// The still submitted in the current attempt, kept for re-display.
    pub fn still(&self) -> Option<StillImage> {
        self.core.lock().still.clone()
    }

    pub fn has_navigated(&self) -> bool {
        self.core.lock().navigated
    }

    /// Reports whether this screen may proceed at all. Without an identity
    /// the user is sent back to login.
    pub fn ensure_identity(&self) -> Result<&SessionIdentity, SessionError> {
        match self.core.identity.as_ref() {
            Some(identity) => Ok(identity),
            None => {
                self.core.redirect_missing_identity();
                Err(SessionError::MissingIdentity)
            }
        }
    }

    /// Verification is the second factor, so it needs a live password
    /// sign-in when an auth session is attached. Enrollment follows
    /// registration and has none.
    pub fn ensure_signed_in(&self) -> Result<(), SessionError> {
        let signed_out = self.core.kind == AttemptKind::Verify
            && self
                .core
                .auth
                .as_ref()
                .is_some_and(|auth| !auth.is_authenticated());
        if signed_out {
            log::warn!("Verify screen opened without a sign-in; redirecting to login");
            self.core
                .navigator
                .navigate(Route::login_with(NOTICE_LOGIN_REQUIRED));
            return Err(SessionError::SignedOut);
        }
        Ok(())
    }

    /// Submits `image` for the current attempt. Only valid from `Idle`.
    pub fn capture(&self, image: StillImage) -> Result<(), SessionError> {
        let identity = self.ensure_identity()?.clone();

        let generation = {
            let mut attempt = self.core.lock();
            if attempt.torn_down {
                return Err(SessionError::TornDown);
            }
            match attempt.state {
                SessionState::Idle => {}
                SessionState::Submitting => return Err(SessionError::AlreadySubmitting),
                _ => return Err(SessionError::AttemptResolved),
            }
            attempt.state = SessionState::Submitting;
            attempt.generation += 1;
            attempt.still = Some(image.clone());
            self.core.signals.set_attempt_in_flight(true);
            self.core.changed.notify_all();
            attempt.generation
        };

        log::info!(
            "Submitting {:?} attempt {generation} for user {}",
            self.core.kind,
            identity.user_id
        );
        let core = Arc::clone(&self.core);
        thread::spawn(move || {
            let result = core.submit(&identity.user_id, &image);
            core.resolve(generation, result);
        });
        Ok(())
    }

    /// `Failure -> Idle`. Discards the failed still and re-enables capture.
    pub fn retry(&self) -> Result<(), SessionError> {
        let mut attempt = self.core.lock();
        if attempt.torn_down {
            return Err(SessionError::TornDown);
        }
        if !matches!(attempt.state, SessionState::Failure { .. }) {
            return Err(SessionError::NotFailed);
        }
        attempt.state = SessionState::Idle;
        attempt.still = None;
        self.core.signals.set_attempt_resolved(false);
        self.core.signals.set_attempt_in_flight(false);
        self.core.changed.notify_all();
        log::debug!("Attempt {} reset for retry", attempt.generation);
        Ok(())
    }

    /// Gives up after a failed attempt: signs out and returns to login.
    pub fn abandon(&self) -> Result<(), SessionError> {
        let mut attempt = self.core.lock();
        if attempt.torn_down {
            return Err(SessionError::TornDown);
        }
        if !matches!(attempt.state, SessionState::Failure { .. }) || attempt.navigated {
            return Err(SessionError::NotFailed);
        }
        if let Some(auth) = &self.core.auth {
            auth.clear();
        }
        attempt.navigated = true;
        let route = match self.core.kind {
            AttemptKind::Verify => Route::login_with(NOTICE_VERIFICATION_FAILED),
            AttemptKind::Enroll => Route::Login { notice: None },
        };
        self.core.navigator.navigate(route);
        Ok(())
    }

    /// Blocks until the current attempt leaves `Submitting`, the session is
    /// torn down, or `timeout` elapses. Returns the state at that point.
    pub fn wait_until_resolved(&self, timeout: Duration) -> SessionState {
        let deadline = Instant::now() + timeout;
        let mut attempt = self.core.lock();
        while attempt.state == SessionState::Submitting && !attempt.torn_down {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            attempt = self
                .core
                .changed
                .wait_timeout(attempt, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        attempt.state.clone()
    }

    /// Cancels any pending grace navigation and makes every later result a
    /// no-op. Idempotent.
    pub fn teardown(&self) {
        let timer = {
            let mut attempt = self.core.lock();
            if attempt.torn_down {
                return;
            }
            attempt.torn_down = true;
            // Disconnecting the cancel channel wakes the timer.
            attempt.grace_cancel.take();
            self.core.changed.notify_all();
            attempt.grace_timer.take()
        };
        if let Some(timer) = timer {
            if timer.thread().id() != thread::current().id() && timer.join().is_err() {
                log::error!("Grace timer panicked");
            }
        }
        log::debug!("Verification session torn down");
    }
}

impl Drop for VerificationSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Core {
    fn lock(&self) -> MutexGuard<'_, Attempt> {
        self.attempt.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn redirect_missing_identity(&self) {
        log::warn!("No identity for {:?} screen; redirecting to login", self.kind);
        self.notifier
            .notify(Notice::error("Error", NOTICE_IDENTITY_MISSING));
        self.navigator
            .navigate(Route::login_with(NOTICE_IDENTITY_MISSING));
    }

    fn submit(&self, user_id: &str, image: &StillImage) -> Result<Outcome, BackendError> {
        match self.kind {
            AttemptKind::Verify => self.backend.verify_face(user_id, image).map(Outcome::Verified),
            AttemptKind::Enroll => self
                .backend
                .register_face(user_id, image)
                .map(|()| Outcome::Enrolled),
        }
    }

    fn resolve(self: &Arc<Self>, generation: u64, result: Result<Outcome, BackendError>) {
        let mut attempt = self.lock();
        if attempt.torn_down
            || attempt.generation != generation
            || attempt.state != SessionState::Submitting
        {
            log::debug!("Discarding result of stale attempt {generation}");
            return;
        }

        let next = match result {
            Ok(Outcome::Verified(verification)) => {
                let percent = confidence_percent(verification.confidence);
                if verification.verified {
                    self.notifier.notify(Notice::info(
                        "Verification Successful!",
                        format!("Face verified with {percent}% confidence"),
                    ));
                    SessionState::Success {
                        confidence: Some(percent),
                    }
                } else {
                    self.notifier.notify(Notice::error(
                        "Verification Failed",
                        format!(
                            "Face verification failed ({percent}% confidence). Please try again."
                        ),
                    ));
                    SessionState::Failure {
                        confidence: Some(percent),
                        message: "Face not recognized".to_string(),
                    }
                }
            }
            Ok(Outcome::Enrolled) => {
                self.notifier.notify(Notice::info(
                    "Success!",
                    "Your face has been registered successfully",
                ));
                SessionState::Success { confidence: None }
            }
            Err(e) => {
                log::warn!("{:?} attempt {generation} failed: {e}", self.kind);
                self.notifier.notify(Notice::error("Error", e.to_string()));
                SessionState::Failure {
                    confidence: None,
                    message: e.to_string(),
                }
            }
        };

        log::info!("Attempt {generation} resolved: {next:?}");
        if self.kind == AttemptKind::Enroll && matches!(next, SessionState::Failure { .. }) {
            attempt.still = None;
        }
        if matches!(next, SessionState::Success { .. }) {
            self.schedule_navigation(&mut attempt, generation);
        }
        self.signals.set_attempt_resolved(true);
        attempt.state = next;
        self.changed.notify_all();
    }

    fn schedule_navigation(self: &Arc<Self>, attempt: &mut Attempt, generation: u64) {
        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let core = Arc::clone(self);
        let delay = self.grace_delay;
        attempt.grace_cancel = Some(cancel_tx);
        attempt.grace_timer = Some(thread::spawn(move || {
            select! {
                recv(after(delay)) -> _ => core.finish(generation),
                recv(cancel_rx) -> _ => {}
            }
        }));
    }

    fn finish(&self, generation: u64) {
        let mut attempt = self.lock();
        if attempt.torn_down || attempt.navigated || attempt.generation != generation {
            return;
        }
        if !matches!(attempt.state, SessionState::Success { .. }) {
            return;
        }
        attempt.navigated = true;
        let route = match (&self.kind, &self.identity) {
            (AttemptKind::Verify, Some(identity)) => Route::Dashboard {
                identity: identity.with_face_data(),
            },
            (AttemptKind::Enroll, _) => Route::login_with(NOTICE_REGISTRATION_COMPLETE),
            (AttemptKind::Verify, None) => Route::login_with(NOTICE_IDENTITY_MISSING),
        };
        log::info!("Navigating to {route:?}");
        self.navigator.navigate(route);
    }
}

/// Backend confidence as a whole percentage, clamped to [0, 100].
pub fn confidence_percent(confidence: f64) -> u32 {
    if confidence.is_nan() {
        return 0;
    }
    (confidence.clamp(0.0, 1.0) * 100.0).round() as u32
}
