use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::capture::still_image::StillImage;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),
    #[error("{0}")]
    Rejected(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// User record as returned by the login endpoint. Every field is optional
/// on the wire; callers normalize.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct UserRecord {
    #[serde(deserialize_with = "id::optional")]
    pub id: Option<String>,
    #[serde(deserialize_with = "id::optional")]
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub has_face_data: Option<bool>,
}

/// Login response. Some deployments nest the user under `user`, others put
/// its fields at the top level.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoginResponse {
    pub user: Option<UserRecord>,
    #[serde(flatten)]
    pub top_level: UserRecord,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceVerification {
    pub verified: bool,
    /// Similarity reported by the service, nominally in [0, 1].
    pub confidence: f64,
}

/// External identity and face service.
pub trait FaceBackend: Send + Sync {
    /// Creates an account and returns its user id.
    fn register(&self, username: &str, email: &str, password: &str)
        -> Result<String, BackendError>;

    fn login(&self, email: &str, password: &str) -> Result<LoginResponse, BackendError>;

    fn register_face(&self, user_id: &str, image: &StillImage) -> Result<(), BackendError>;

    fn verify_face(
        &self,
        user_id: &str,
        image: &StillImage,
    ) -> Result<FaceVerification, BackendError>;
}

/// Identifiers arrive as JSON strings or numbers.
pub(crate) mod id {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
        Float(f64),
    }

    impl From<RawId> for String {
        fn from(raw: RawId) -> Self {
            match raw {
                RawId::Text(s) => s,
                RawId::Int(n) => n.to_string(),
                RawId::Float(n) => n.to_string(),
            }
        }
    }

    pub fn required<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        RawId::deserialize(deserializer).map(String::from)
    }

    pub fn optional<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        Option::<RawId>::deserialize(deserializer).map(|raw| raw.map(String::from))
    }
}
