use serde::{Deserialize, Serialize};

/// The authenticated user handed over by the credential step. Read-only to
/// the face flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub has_face_data: bool,
}

impl SessionIdentity {
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        email: impl Into<String>,
        has_face_data: bool,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            email: email.into(),
            has_face_data,
        }
    }

    /// Copy of this identity marked as having enrolled face data.
    pub fn with_face_data(&self) -> Self {
        Self {
            has_face_data: true,
            ..self.clone()
        }
    }
}
