use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::capture::still_image::StillImage;
use crate::verification::domain::face_backend::{
    id, BackendError, FaceBackend, FaceVerification, LoginResponse, UserRecord,
};

const FALLBACK_ERROR: &str = "An error occurred";

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

#[derive(Deserialize)]
struct RegisterBody {
    #[serde(deserialize_with = "id::required")]
    user_id: String,
}

#[derive(Deserialize)]
struct RegisterFaceBody {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct VerifyBody {
    verified: bool,
    confidence: f64,
}

/// [`FaceBackend`] over the service's JSON and multipart HTTP API.
pub struct HttpFaceBackend {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpFaceBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Profile of the signed-in user. Requires a bearer token.
    pub fn profile(&self, token: &str) -> Result<UserRecord, BackendError> {
        self.send(self.client.get(self.url("user/profile")).bearer_auth(token))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn face_form(user_id: &str, image: &StillImage, file_name: &str) -> Result<Form, BackendError> {
        let part = Part::bytes(image.jpeg().to_vec())
            .file_name(file_name.to_string())
            .mime_str("image/jpeg")
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(Form::new()
            .part("face_image", part)
            .text("user_id", user_id.to_string()))
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
        let response = request.send().map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response.text().map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            log::debug!("Service answered {status}: {body}");
            return Err(BackendError::Rejected(error_message(&body)));
        }
        serde_json::from_str(&body).map_err(|e| BackendError::Malformed(e.to_string()))
    }

    fn transport_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Network(e.to_string())
        }
    }
}

impl FaceBackend for HttpFaceBackend {
    fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<String, BackendError> {
        let body = json!({ "username": username, "email": email, "password": password });
        let registered: RegisterBody =
            self.send(self.client.post(self.url("auth/register")).json(&body))?;
        Ok(registered.user_id)
    }

    fn login(&self, email: &str, password: &str) -> Result<LoginResponse, BackendError> {
        let body = json!({ "email": email, "password": password });
        self.send(self.client.post(self.url("auth/login")).json(&body))
    }

    fn register_face(&self, user_id: &str, image: &StillImage) -> Result<(), BackendError> {
        let form = Self::face_form(user_id, image, "face.jpg")?;
        let body: RegisterFaceBody = self.send(
            self.client
                .post(self.url("face/register-face"))
                .multipart(form),
        )?;
        match body.success {
            Some(false) => Err(BackendError::Rejected(
                body.error.unwrap_or_else(|| "Failed to register face".to_string()),
            )),
            _ => Ok(()),
        }
    }

    fn verify_face(
        &self,
        user_id: &str,
        image: &StillImage,
    ) -> Result<FaceVerification, BackendError> {
        let form = Self::face_form(user_id, image, "face-verification.jpg")?;
        let body: VerifyBody = self.send(
            self.client
                .post(self.url("face/verify-face"))
                .multipart(form),
        )?;
        Ok(FaceVerification {
            verified: body.verified,
            confidence: body.confidence,
        })
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| FALLBACK_ERROR.to_string())
}
