pub mod media_device;
