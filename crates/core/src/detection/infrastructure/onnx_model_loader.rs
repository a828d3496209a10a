use crate::detection::domain::face_detector::FaceDetector;
use crate::detection::domain::model_loader::{ModelLoadError, ModelLoader};
use crate::shared::constants::FACE_MODEL_NAME;

use super::model_resolver::{self, ModelSource, ProgressFn};
use super::onnx_face_detector::OnnxFaceDetector;

/// Resolves the detector weights from a [`ModelSource`] and opens an ONNX session.
pub struct OnnxModelLoader {
    source: ModelSource,
    model_name: String,
    progress: Option<fn(u64, u64)>,
}

impl OnnxModelLoader {
    pub fn new(source: ModelSource) -> Self {
        Self {
            source,
            model_name: FACE_MODEL_NAME.to_string(),
            progress: None,
        }
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    /// Reports `(downloaded, total)` bytes while fetching from a URL source.
    pub fn with_progress(mut self, progress: fn(u64, u64)) -> Self {
        self.progress = Some(progress);
        self
    }

    fn report_reachability(&self) {
        match model_resolver::probe(&self.model_name, &self.source) {
            Ok(()) => log::info!("Model file {} is reachable", self.model_name),
            Err(e) => log::error!("Could not access model files at {}: {e}", self.source),
        }
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self) -> Result<Box<dyn FaceDetector>, ModelLoadError> {
        log::info!("Loading face detection model from {}", self.source);

        let path = model_resolver::resolve(
            &self.model_name,
            &self.source,
            self.progress.map(|f| Box::new(f) as ProgressFn),
        )
        .map_err(|e| {
            self.report_reachability();
            ModelLoadError::Unavailable(e.to_string())
        })?;

        match OnnxFaceDetector::new(&path) {
            Ok(detector) => {
                log::info!("Face detection model loaded from {}", path.display());
                Ok(Box::new(detector))
            }
            Err(e) => {
                log::error!("Error loading models: {e}");
                self.report_reachability();
                Err(e)
            }
        }
    }
}
