use thiserror::Error;

use super::face_detector::FaceDetector;

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("face detection model unavailable: {0}")]
    Unavailable(String),
    #[error("face detection model failed to initialize: {0}")]
    Initialize(String),
}

/// Loads the detection models and hands back a ready detector.
///
/// A failure here is terminal for the screen that asked.
pub trait ModelLoader {
    fn load(&self) -> Result<Box<dyn FaceDetector>, ModelLoadError>;
}
