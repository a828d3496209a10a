use std::time::Duration;

/// Short-range face detector weights, resolved from the configured model source.
pub const FACE_MODEL_NAME: &str = "face_detector_short_range.onnx";

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// Bundled models directory, relative to the working directory.
pub const DEFAULT_MODELS_DIR: &str = "models";

pub const CAMERA_IDEAL_WIDTH: u32 = 640;
pub const CAMERA_IDEAL_HEIGHT: u32 = 480;
pub const CAMERA_IDEAL_FRAME_RATE: u32 = 30;

/// Bounded wait for the stream to report video dimensions.
pub const CAMERA_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// One display refresh at 60 Hz.
pub const DISPLAY_REFRESH_INTERVAL: Duration = Duration::from_micros(16_667);

pub const DETECTOR_TIMEOUT: Duration = Duration::from_secs(2);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// How long a success confirmation stays visible before navigating on.
pub const SUCCESS_GRACE_DELAY: Duration = Duration::from_millis(1500);

pub const JPEG_QUALITY: u8 = 92;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
