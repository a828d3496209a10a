pub mod model_resolver;
pub mod onnx_face_detector;
pub mod onnx_model_loader;
pub mod timed_face_detector;
