use thiserror::Error;

use crate::auth::auth_session::AuthSession;
use crate::verification::domain::face_backend::{BackendError, FaceBackend, UserRecord};
use crate::verification::domain::identity::SessionIdentity;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoginError {
    #[error("Please enter both email and password")]
    MissingCredentials,
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("Password must be at least 6 characters")]
    PasswordTooShort,
    #[error("Invalid response from server. Please try again.")]
    InvalidResponse,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Account details collected before enrollment.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl Registration {
    pub fn validate(&self) -> Result<(), LoginError> {
        if self.username.is_empty() || self.email.is_empty() || self.password.is_empty() {
            return Err(LoginError::MissingCredentials);
        }
        if self.password != self.confirm_password {
            return Err(LoginError::PasswordMismatch);
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(LoginError::PasswordTooShort);
        }
        Ok(())
    }
}

/// Creates the account and returns the identity to enroll a face for.
pub fn register(
    backend: &dyn FaceBackend,
    registration: &Registration,
) -> Result<SessionIdentity, LoginError> {
    registration.validate()?;
    let user_id = backend.register(
        &registration.username,
        &registration.email,
        &registration.password,
    )?;
    if user_id.is_empty() {
        return Err(LoginError::InvalidResponse);
    }
    log::info!("Account created for {}", registration.email);
    Ok(SessionIdentity::new(
        user_id,
        registration.username.clone(),
        registration.email.clone(),
        false,
    ))
}

/// Password step. On success the auth session is established and the
/// identity for the face step is returned.
pub fn login(
    backend: &dyn FaceBackend,
    auth: &AuthSession,
    email: &str,
    password: &str,
) -> Result<SessionIdentity, LoginError> {
    if email.is_empty() || password.is_empty() {
        return Err(LoginError::MissingCredentials);
    }

    let response = backend.login(email, password)?;
    let identity = normalize(response.user.as_ref().unwrap_or(&response.top_level), email)?;

    auth.establish(response.token);
    log::info!("Password accepted for user {}", identity.user_id);
    Ok(identity)
}

fn normalize(user: &UserRecord, entered_email: &str) -> Result<SessionIdentity, LoginError> {
    let user_id = [user.id.as_deref(), user.user_id.as_deref()]
        .into_iter()
        .flatten()
        .find(|id| !id.is_empty())
        .ok_or(LoginError::InvalidResponse)?;

    let username = user
        .username
        .clone()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| local_part(entered_email).to_string());
    let email = user
        .email
        .clone()
        .filter(|email| !email.is_empty())
        .unwrap_or_else(|| entered_email.to_string());

    Ok(SessionIdentity::new(
        user_id,
        username,
        email,
        user.has_face_data.unwrap_or(false),
    ))
}

fn local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}
