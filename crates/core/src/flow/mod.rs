pub mod face_screen;
pub mod notifier;
