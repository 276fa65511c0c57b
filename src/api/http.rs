//! HTTP client for the booth backend.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use url::Url;

use crate::config;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Invalid endpoint: {0}")]
    Url(#[from] url::ParseError),
    #[error("Server error: {0}")]
    Server(String),
}

/// Every backend response is wrapped in the same `{success, data}` envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionPayload {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    #[serde(rename = "arState")]
    ar_state: ArStatePayload,
}

#[derive(Debug, Deserialize)]
struct ArStatePayload {
    ended: bool,
}

#[derive(Debug, Deserialize)]
struct UploadPayload {
    #[serde(rename = "imageUrl")]
    image_url: String,
}

/// The backend contract the booth core depends on. `ApiClient` is the real
/// implementation; tests substitute their own.
#[async_trait]
pub trait BoothBackend: Send + Sync {
    async fn create_session(&self, force_new: bool) -> Result<String, ApiError>;
    async fn reset_session(&self, session_id: &str) -> Result<(), ApiError>;
    /// Point-in-time check of whether the AR session already ended server-side.
    async fn session_status(&self, session_id: &str) -> Result<bool, ApiError>;
    async fn upload_photo(
        &self,
        photo: Vec<u8>,
        session_id: &str,
        counter: &str,
    ) -> Result<String, ApiError>;
    async fn remove_background(
        &self,
        image: Vec<u8>,
        session_id: &str,
        counter: &str,
    ) -> Result<String, ApiError>;
}

/// HTTP client for the booth API.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new() -> Self {
        Self::with_base(config::API_BASE_URL.clone())
    }

    pub fn with_base(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }

    /// Unwrap the response envelope, mapping non-2xx statuses and
    /// `success: false` bodies to [`ApiError::Server`].
    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Server(format!("{}: {}", status, body)));
        }

        let envelope: Envelope<T> = response.json().await?;
        if !envelope.success {
            return Err(ApiError::Server(
                envelope
                    .message
                    .unwrap_or_else(|| "request was not successful".to_string()),
            ));
        }
        envelope
            .data
            .ok_or_else(|| ApiError::Server("response missing data".to_string()))
    }

    /// Allocate a session identifier.
    pub async fn create_session(&self, force_new: bool) -> Result<String, ApiError> {
        let url = self.endpoint(config::CREATE_SESSION_PATH)?;
        log::info!("Creating AR session at {}", url);

        let response = self
            .client
            .post(url)
            .json(&json!({ "forceNew": force_new }))
            .send()
            .await?;

        let payload: SessionPayload = Self::parse(response).await?;
        log::info!("Created AR session: {}", payload.session_id);
        Ok(payload.session_id)
    }

    /// Mark a session reusable after a retry.
    pub async fn reset_session(&self, session_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(config::RESET_SESSION_PATH)?;
        log::info!("Resetting AR session {}", session_id);

        let response = self
            .client
            .post(url)
            .json(&json!({ "sessionId": session_id }))
            .send()
            .await?;

        let _: serde_json::Value = Self::parse(response).await?;
        log::info!("Session {} reset", session_id);
        Ok(())
    }

    /// Whether the server already considers the AR session ended.
    pub async fn session_status(&self, session_id: &str) -> Result<bool, ApiError> {
        let url = self.endpoint(&config::session_status_path(session_id))?;
        log::debug!("Checking session status at {}", url);

        let response = self.client.get(url).send().await?;
        let payload: StatusPayload = Self::parse(response).await?;
        Ok(payload.ar_state.ended)
    }

    /// Store a captured photo, tagged with the session id and alternating counter.
    pub async fn upload_photo(
        &self,
        photo: Vec<u8>,
        session_id: &str,
        counter: &str,
    ) -> Result<String, ApiError> {
        let url = self.endpoint(config::UPLOAD_PHOTO_PATH)?;
        log::info!(
            "Uploading photo for session {} (counter {})",
            session_id,
            counter
        );

        let part = reqwest::multipart::Part::bytes(photo)
            .file_name(format!("{}_screenshot_{}.png", session_id, counter))
            .mime_str("image/png")?;
        let form = reqwest::multipart::Form::new()
            .part("photo", part)
            .text("sessionId", session_id.to_string())
            .text("source", config::PHOTO_SOURCE_TAG)
            .text("counter", counter.to_string());

        let response = self.client.post(url).multipart(form).send().await?;
        let payload: UploadPayload = Self::parse(response).await?;
        log::info!("Photo uploaded: {}", payload.image_url);
        Ok(payload.image_url)
    }

    /// Request a background-stripped variant of the captured photo.
    pub async fn remove_background(
        &self,
        image: Vec<u8>,
        session_id: &str,
        counter: &str,
    ) -> Result<String, ApiError> {
        let url = self.endpoint(config::REMOVE_BACKGROUND_PATH)?;
        log::info!("Requesting background removal for session {}", session_id);

        let part = reqwest::multipart::Part::bytes(image)
            .file_name(format!("{}_screenshot.png", session_id))
            .mime_str("image/png")?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("sessionId", session_id.to_string())
            .text("counter", counter.to_string());

        let response = self.client.post(url).multipart(form).send().await?;
        let payload: UploadPayload = Self::parse(response).await?;
        Ok(payload.image_url)
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BoothBackend for ApiClient {
    async fn create_session(&self, force_new: bool) -> Result<String, ApiError> {
        ApiClient::create_session(self, force_new).await
    }

    async fn reset_session(&self, session_id: &str) -> Result<(), ApiError> {
        ApiClient::reset_session(self, session_id).await
    }

    async fn session_status(&self, session_id: &str) -> Result<bool, ApiError> {
        ApiClient::session_status(self, session_id).await
    }

    async fn upload_photo(
        &self,
        photo: Vec<u8>,
        session_id: &str,
        counter: &str,
    ) -> Result<String, ApiError> {
        ApiClient::upload_photo(self, photo, session_id, counter).await
    }

    async fn remove_background(
        &self,
        image: Vec<u8>,
        session_id: &str,
        counter: &str,
    ) -> Result<String, ApiError> {
        ApiClient::remove_background(self, image, session_id, counter).await
    }
}
