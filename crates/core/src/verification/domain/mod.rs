pub mod face_backend;
pub mod identity;
pub mod navigator;
