pub mod face_detector;
pub mod model_loader;
