pub mod capture_controller;
pub mod still_image;
