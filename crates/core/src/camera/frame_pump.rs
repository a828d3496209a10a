use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::camera::domain::media_device::{
    CameraConstraints, CameraError, FrameSource, MediaDevices, MediaStream,
};
use crate::shared::constants::CAMERA_READY_TIMEOUT;
use crate::shared::frame::Frame;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A live stream plus its negotiated dimensions.
///
/// Dropping the session stops every hardware track, so a session that goes
/// out of scope on an error path still turns the camera off.
struct CameraSession {
    stream: Box<dyn MediaStream>,
    dimensions: Option<(u32, u32)>,
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.stream.stop_tracks();
    }
}

/// Sole owner of the camera stream.
///
/// Other components read frames through [`FramePump::current_frame`] and
/// never touch the stream directly.
pub struct FramePump {
    devices: Arc<dyn MediaDevices>,
    session: Mutex<Option<CameraSession>>,
    ready_timeout: Duration,
}

impl FramePump {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            session: Mutex::new(None),
            ready_timeout: CAMERA_READY_TIMEOUT,
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Acquires the camera and waits for the stream to report its dimensions.
    ///
    /// Returns the negotiated `(width, height)`. Calling `start` on a pump that
    /// is already running keeps the existing stream.
    pub fn start(&self, constraints: &CameraConstraints) -> Result<(u32, u32), CameraError> {
        if let Some(dimensions) = self.dimensions() {
            return Ok(dimensions);
        }

        log::info!(
            "Requesting camera access ({}x{} @ {} fps, {:?})",
            constraints.width,
            constraints.height,
            constraints.frame_rate,
            constraints.facing_mode
        );
        let stream = self.devices.open(constraints)?;
        let mut session = CameraSession {
            stream,
            dimensions: None,
        };
        let dimensions = wait_for_dimensions(session.stream.as_ref(), self.ready_timeout)?;
        session.dimensions = Some(dimensions);
        log::info!(
            "Camera ready, dimensions: {}x{}",
            dimensions.0,
            dimensions.1
        );

        let mut slot = self.lock();
        match slot.as_ref().and_then(|existing| existing.dimensions) {
            // Lost a race with another start; the new session drops here.
            Some(existing) => Ok(existing),
            None => {
                *slot = Some(session);
                Ok(dimensions)
            }
        }
    }

    /// Releases every hardware track. Safe to call any number of times.
    pub fn stop(&self) {
        if self.lock().take().is_some() {
            log::info!("Camera stopped");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.lock().is_some()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.lock().as_ref().and_then(|session| session.dimensions)
    }

    /// The frame currently on the stream, or `None` if the camera is stopped
    /// or not yet producing decodable frames.
    pub fn current_frame(&self) -> Option<Frame> {
        self.lock()
            .as_mut()
            .and_then(|session| session.stream.read_frame())
    }

    pub fn advance(&self) {
        if let Some(session) = self.lock().as_mut() {
            session.stream.advance();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<CameraSession>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FrameSource for FramePump {
    fn current_frame(&self) -> Option<Frame> {
        FramePump::current_frame(self)
    }

    fn advance(&self) {
        FramePump::advance(self)
    }
}

impl Drop for FramePump {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wait_for_dimensions(
    stream: &dyn MediaStream,
    timeout: Duration,
) -> Result<(u32, u32), CameraError> {
    let deadline = Instant::now() + timeout;
    loop {
        match stream.video_dimensions() {
            Some((w, h)) if w > 0 && h > 0 => return Ok((w, h)),
            _ if Instant::now() >= deadline => return Err(CameraError::Timeout(timeout)),
            _ => thread::sleep(READY_POLL_INTERVAL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubStream {
        tracks: Arc<AtomicUsize>,
        stopped: bool,
        dimensions: Option<(u32, u32)>,
        decodable: bool,
    }

    impl MediaStream for StubStream {
        fn video_dimensions(&self) -> Option<(u32, u32)> {
            self.dimensions
        }

        fn read_frame(&mut self) -> Option<Frame> {
            (self.decodable && !self.stopped).then(|| Frame::filled(4, 4, [9, 9, 9], 0))
        }

        fn stop_tracks(&mut self) {
            if !self.stopped {
                self.stopped = true;
                self.tracks.fetch_sub(1, Ordering::SeqCst);
            }
        }

        fn active_tracks(&self) -> usize {
            usize::from(!self.stopped)
        }
    }

    struct StubDevices {
        tracks: Arc<AtomicUsize>,
        opens: AtomicUsize,
        result: Result<Option<(u32, u32)>, CameraError>,
        decodable: bool,
    }

    impl StubDevices {
        fn with(result: Result<Option<(u32, u32)>, CameraError>) -> Self {
            Self {
                tracks: Arc::new(AtomicUsize::new(0)),
                opens: AtomicUsize::new(0),
                result,
                decodable: true,
            }
        }
    }

    impl MediaDevices for StubDevices {
        fn open(
            &self,
            _constraints: &CameraConstraints,
        ) -> Result<Box<dyn MediaStream>, CameraError> {
            let dimensions = self.result.clone()?;
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.tracks.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubStream {
                tracks: self.tracks.clone(),
                stopped: false,
                dimensions,
                decodable: self.decodable,
            }))
        }
    }

    fn pump(devices: &Arc<StubDevices>) -> FramePump {
        FramePump::new(devices.clone()).with_ready_timeout(Duration::from_millis(50))
    }

    #[test]
    fn test_start_then_stop_releases_every_track() {
        let devices = Arc::new(StubDevices::with(Ok(Some((640, 480)))));
        let pump = pump(&devices);

        assert_eq!(pump.start(&CameraConstraints::default()).unwrap(), (640, 480));
        assert!(pump.is_ready());
        assert_eq!(devices.tracks.load(Ordering::SeqCst), 1);

        pump.stop();
        assert!(!pump.is_ready());
        assert_eq!(devices.tracks.load(Ordering::SeqCst), 0);

        pump.stop();
        assert_eq!(devices.tracks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_second_start_keeps_single_session() {
        let devices = Arc::new(StubDevices::with(Ok(Some((640, 480)))));
        let pump = pump(&devices);

        pump.start(&CameraConstraints::default()).unwrap();
        pump.start(&CameraConstraints::default()).unwrap();

        assert_eq!(devices.opens.load(Ordering::SeqCst), 1);
        assert_eq!(devices.tracks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_permission_denied_is_reported() {
        let devices = Arc::new(StubDevices::with(Err(CameraError::PermissionDenied)));
        let pump = pump(&devices);

        let err = pump.start(&CameraConstraints::default()).unwrap_err();

        assert_eq!(err, CameraError::PermissionDenied);
        assert!(!pump.is_ready());
    }

    #[test]
    fn test_timeout_releases_stream_on_error_path() {
        let devices = Arc::new(StubDevices::with(Ok(None)));
        let pump = pump(&devices);

        let err = pump.start(&CameraConstraints::default()).unwrap_err();

        assert_eq!(err, CameraError::Timeout(Duration::from_millis(50)));
        assert_eq!(devices.opens.load(Ordering::SeqCst), 1);
        assert_eq!(devices.tracks.load(Ordering::SeqCst), 0);
        assert!(!pump.is_ready());
    }

    #[test]
    fn test_zero_dimensions_are_not_ready() {
        let devices = Arc::new(StubDevices::with(Ok(Some((0, 0)))));
        let pump = pump(&devices);

        let err = pump.start(&CameraConstraints::default()).unwrap_err();

        assert!(matches!(err, CameraError::Timeout(_)));
    }

    #[test]
    fn test_drop_releases_stream() {
        let devices = Arc::new(StubDevices::with(Ok(Some((320, 240)))));
        {
            let pump = pump(&devices);
            pump.start(&CameraConstraints::default()).unwrap();
            assert_eq!(devices.tracks.load(Ordering::SeqCst), 1);
        }
        assert_eq!(devices.tracks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_current_frame_requires_running_decodable_stream() {
        let mut stub = StubDevices::with(Ok(Some((4, 4))));
        stub.decodable = false;
        let devices = Arc::new(stub);
        let pump = pump(&devices);
        assert!(pump.current_frame().is_none());

        pump.start(&CameraConstraints::default()).unwrap();
        assert!(pump.current_frame().is_none());

        let devices = Arc::new(StubDevices::with(Ok(Some((4, 4)))));
        let pump = FramePump::new(devices.clone());
        pump.start(&CameraConstraints::default()).unwrap();
        assert_eq!(pump.current_frame().unwrap().width(), 4);
        pump.stop();
        assert!(pump.current_frame().is_none());
    }
}
