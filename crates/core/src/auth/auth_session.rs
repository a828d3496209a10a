use std::sync::{Mutex, MutexGuard};

/// What marks the process as signed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Bearer token issued by the service.
    Token(String),
    /// The service accepted the password but issued no token.
    SessionMarker,
}

/// Process-wide sign-in state with explicit lifecycle points:
/// [`establish`](Self::establish) after a successful password login,
/// [`clear`](Self::clear) on logout or an abandoned face verification.
#[derive(Debug, Default)]
pub struct AuthSession {
    credential: Mutex<Option<Credential>>,
}

impl AuthSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// A missing token still counts as authenticated for the face step.
    pub fn establish(&self, token: Option<String>) {
        let credential = match token.filter(|t| !t.is_empty()) {
            Some(token) => Credential::Token(token),
            None => Credential::SessionMarker,
        };
        *self.lock() = Some(credential);
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().is_some()
    }

    pub fn credential(&self) -> Option<Credential> {
        self.lock().clone()
    }

    pub fn bearer_token(&self) -> Option<String> {
        match self.lock().as_ref() {
            Some(Credential::Token(token)) => Some(token.clone()),
            _ => None,
        }
    }

    pub fn clear(&self) {
        if self.lock().take().is_some() {
            log::debug!("Auth session cleared");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Credential>> {
        self.credential.lock().unwrap_or_else(|e| e.into_inner())
    }
}
