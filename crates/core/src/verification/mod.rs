pub mod domain;
pub mod infrastructure;
pub mod verification_session;
