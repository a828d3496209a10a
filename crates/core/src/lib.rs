pub mod auth;
pub mod camera;
pub mod capture;
pub mod detection;
pub mod flow;
pub mod presence;
pub mod shared;
pub mod verification;
