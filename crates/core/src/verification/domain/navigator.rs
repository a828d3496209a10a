use crate::verification::domain::identity::SessionIdentity;

pub const NOTICE_REGISTRATION_COMPLETE: &str =
    "Registration complete! Please log in with your credentials.";
pub const NOTICE_VERIFICATION_FAILED: &str = "Face verification failed. Please try again.";
pub const NOTICE_IDENTITY_MISSING: &str = "User information not found. Please log in again.";
pub const NOTICE_LOGIN_REQUIRED: &str = "Please log in to continue";

/// Where the flow goes once a screen is done with the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Dashboard { identity: SessionIdentity },
    Login { notice: Option<String> },
}

impl Route {
    pub fn login_with(notice: &str) -> Self {
        Route::Login {
            notice: Some(notice.to_string()),
        }
    }
}

/// Receives terminal navigation side effects.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}
