pub mod domain;
pub mod frame_pump;
pub mod infrastructure;
