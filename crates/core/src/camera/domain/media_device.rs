use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::constants::{CAMERA_IDEAL_FRAME_RATE, CAMERA_IDEAL_HEIGHT, CAMERA_IDEAL_WIDTH};
use crate::shared::frame::Frame;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("camera permission denied; allow camera access and try again")]
    PermissionDenied,
    #[error("no camera matches the requested constraints: {0}")]
    DeviceUnavailable(String),
    #[error("camera did not produce video within {0:?}")]
    Timeout(std::time::Duration),
    #[error("failed to load video stream: {0}")]
    StreamFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    #[default]
    User,
    Environment,
}

/// Requested capture configuration. Values are ideals, not hard limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConstraints {
    pub width: u32,
    pub height: u32,
    pub facing_mode: FacingMode,
    pub frame_rate: u32,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            width: CAMERA_IDEAL_WIDTH,
            height: CAMERA_IDEAL_HEIGHT,
            facing_mode: FacingMode::User,
            frame_rate: CAMERA_IDEAL_FRAME_RATE,
        }
    }
}

/// Platform camera access.
pub trait MediaDevices: Send + Sync {
    /// Requests a video stream. Hardware tracks are live once this returns `Ok`.
    fn open(&self, constraints: &CameraConstraints) -> Result<Box<dyn MediaStream>, CameraError>;
}

/// A live camera stream holding one or more hardware tracks.
pub trait MediaStream: Send {
    /// Native video dimensions, once the stream has negotiated them.
    fn video_dimensions(&self) -> Option<(u32, u32)>;

    /// The current frame, or `None` while the stream cannot yet produce a
    /// decodable one.
    fn read_frame(&mut self) -> Option<Frame>;

    /// Moves a replayed stream on to its next frame. Live cameras advance on
    /// their own, so the default does nothing.
    fn advance(&mut self) {}

    /// Stops every hardware track. Must be safe to call more than once.
    fn stop_tracks(&mut self);

    fn active_tracks(&self) -> usize;
}

/// Anything that can hand out the most recent camera frame.
pub trait FrameSource: Send + Sync {
    /// `None` while no decodable frame is available.
    fn current_frame(&self) -> Option<Frame>;

    /// Called once per display tick, before the frame for that tick is read.
    fn advance(&self) {}
}
