use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::face_box::FaceBox;
use crate::shared::frame::Frame;

/// Speed/accuracy tradeoff requested from a detector.
///
/// Per-frame polling uses `Fast`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorVariant {
    #[default]
    Fast,
    Accurate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorOptions {
    pub variant: DetectorVariant,
    /// Faces scoring below this are dropped.
    pub score_threshold: f64,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            variant: DetectorVariant::Fast,
            score_threshold: 0.5,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("face detection timed out after {0:?}")]
    Timeout(Duration),
    #[error("face detection failed: {0}")]
    Inference(String),
    #[error("detector does not support the {0:?} variant")]
    Unsupported(DetectorVariant),
    #[error("detector worker has stopped")]
    Stopped,
}

/// Domain interface for the external face-detection capability.
///
/// Implementations may hold inference sessions that need exclusive access,
/// hence `&mut self`.
pub trait FaceDetector: Send {
    fn detect(
        &mut self,
        frame: &Frame,
        options: &DetectorOptions,
    ) -> Result<Vec<FaceBox>, DetectorError>;
}
