#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use facegate_core::capture::still_image::StillImage;
use facegate_core::detection::domain::face_detector::{
    DetectorError, DetectorOptions, FaceDetector,
};
use facegate_core::detection::domain::model_loader::{ModelLoadError, ModelLoader};
use facegate_core::shared::face_box::FaceBox;
use facegate_core::shared::frame::Frame;
use facegate_core::verification::domain::face_backend::{
    BackendError, FaceBackend, FaceVerification, LoginResponse,
};
use facegate_core::verification::domain::navigator::{Navigator, Route};

/// Writes a few solid-colour PNGs to replay as camera frames.
pub fn write_frames(dir: &Path, count: usize) {
    for i in 0..count {
        let img = image::RgbImage::from_pixel(64, 48, image::Rgb([40 * i as u8, 90, 160]));
        img.save(dir.join(format!("frame_{i:03}.png"))).unwrap();
    }
}

/// Shared knobs for the detector a [`StubLoader`] hands out.
#[derive(Clone, Default)]
pub struct DetectorControl {
    pub faces: Arc<AtomicUsize>,
    pub calls: Arc<AtomicUsize>,
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
    pub delay_ms: Arc<AtomicUsize>,
    pub failing: Arc<AtomicBool>,
    /// Sequence number of the last frame handed to the detector.
    pub last_sequence: Arc<AtomicU64>,
}

impl DetectorControl {
    pub fn with_faces(faces: usize) -> Self {
        let control = Self::default();
        control.faces.store(faces, Ordering::SeqCst);
        control
    }
}

struct ControlledDetector {
    control: DetectorControl,
}

impl FaceDetector for ControlledDetector {
    fn detect(
        &mut self,
        frame: &Frame,
        _options: &DetectorOptions,
    ) -> Result<Vec<FaceBox>, DetectorError> {
        let p = &self.control;
        p.last_sequence.store(frame.sequence(), Ordering::SeqCst);
        let now_active = p.active.fetch_add(1, Ordering::SeqCst) + 1;
        p.max_active.fetch_max(now_active, Ordering::SeqCst);
        p.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(p.delay_ms.load(Ordering::SeqCst) as u64));
        p.active.fetch_sub(1, Ordering::SeqCst);

        if p.failing.load(Ordering::SeqCst) {
            return Err(DetectorError::Inference("transient".into()));
        }
        let n = p.faces.load(Ordering::SeqCst);
        Ok((0..n)
            .map(|i| FaceBox::new(i as f64 * 20.0, 0.0, 16.0, 16.0, 0.9))
            .collect())
    }
}

pub struct StubLoader {
    pub control: DetectorControl,
    pub fail: bool,
}

impl ModelLoader for StubLoader {
    fn load(&self) -> Result<Box<dyn FaceDetector>, ModelLoadError> {
        if self.fail {
            return Err(ModelLoadError::Unavailable("models/ not found".into()));
        }
        Ok(Box::new(ControlledDetector {
            control: self.control.clone(),
        }))
    }
}

pub struct StubBackend {
    pub verification: Result<FaceVerification, BackendError>,
    pub enrollment: Result<(), BackendError>,
    pub submissions: AtomicUsize,
}

impl StubBackend {
    pub fn verifying(verified: bool, confidence: f64) -> Self {
        Self {
            verification: Ok(FaceVerification {
                verified,
                confidence,
            }),
            enrollment: Ok(()),
            submissions: AtomicUsize::new(0),
        }
    }
}

impl FaceBackend for StubBackend {
    fn register(&self, _: &str, _: &str, _: &str) -> Result<String, BackendError> {
        Ok("1".into())
    }

    fn login(&self, _: &str, _: &str) -> Result<LoginResponse, BackendError> {
        Ok(LoginResponse::default())
    }

    fn register_face(&self, _user_id: &str, image: &StillImage) -> Result<(), BackendError> {
        assert!(!image.jpeg().is_empty());
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.enrollment.clone()
    }

    fn verify_face(
        &self,
        _user_id: &str,
        image: &StillImage,
    ) -> Result<FaceVerification, BackendError> {
        assert!(!image.jpeg().is_empty());
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.verification.clone()
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    pub routes: Mutex<Vec<Route>>,
}

impl RecordingNavigator {
    pub fn routes(&self) -> Vec<Route> {
        self.routes.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: Route) {
        self.routes.lock().unwrap().push(route);
    }
}

pub fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}
