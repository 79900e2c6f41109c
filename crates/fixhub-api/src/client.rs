//! HTTP client for the hub REST API.
//!
//! Attaches the bearer credential to every authorized request, bounds each
//! request with a timeout, and publishes 401 responses so the dashboard can
//! force the logged-out state.

use crate::credentials::CredentialHolder;
use crate::error::{ApiError, ApiResult};
use fixhub_core::{Credential, ValidationError};
use fixhub_telemetry::Metrics;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Default timeout for API requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Message shown when the hub gives no reason for a failed login.
const LOGIN_FAILED: &str = "Login failed. Please try again.";

/// Login request body.
#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Login response body. On failure the hub returns the same shape with
/// `token` unset and a `message`.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: Option<String>,
    username: Option<String>,
    message: Option<String>,
}

/// Client for the hub REST API.
///
/// Cheap to clone; clones share the connection pool, credential and
/// auth-rejection channel.
#[derive(Clone)]
pub struct HubClient {
    client: Client,
    base_url: Url,
    credentials: CredentialHolder,
    /// Credential generation of the latest 401 from an authorized call.
    auth_rejected: Arc<watch::Sender<Option<u64>>>,
}

impl HubClient {
    /// Create a new hub client.
    ///
    /// # Arguments
    /// * `base_url` - Hub origin, e.g. `http://127.0.0.1:8080`
    /// * `timeout` - Upper bound for each request
    /// * `credentials` - Holder whose credential is attached to requests
    pub fn new(
        base_url: &str,
        timeout: Duration,
        credentials: CredentialHolder,
    ) -> ApiResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| ApiError::Url(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Url(format!("{base_url} cannot be a base URL")));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {e}")))?;

        let (auth_rejected, _) = watch::channel(None);

        Ok(Self {
            client,
            base_url,
            credentials,
            auth_rejected: Arc::new(auth_rejected),
        })
    }

    pub fn credentials(&self) -> &CredentialHolder {
        &self.credentials
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Receiver that changes whenever an authorized call is rejected with 401.
    ///
    /// The value is the [`CredentialHolder::generation`] the rejected request
    /// was sent with.
    pub fn auth_rejections(&self) -> watch::Receiver<Option<u64>> {
        self.auth_rejected.subscribe()
    }

    /// Build an endpoint URL from path segments. Segments are percent-encoded.
    pub fn url(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Url(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Authenticate and store the issued credential.
    ///
    /// Every failure, including network errors, is reported as
    /// [`ApiError::Auth`] with an operator-facing message. Nothing is stored
    /// on failure.
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<Credential> {
        if username.trim().is_empty() {
            return Err(ValidationError::required("username").into());
        }
        if password.is_empty() {
            return Err(ValidationError::required("password").into());
        }

        let url = self.url(&["api", "auth", "login"])?;
        info!(%username, "Logging in");

        let response = self
            .client
            .post(url)
            .json(&LoginRequest { username, password })
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Login request failed");
                ApiError::Auth(LOGIN_FAILED.to_string())
            })?;

        let status = response.status();
        let body: Option<LoginResponse> = response.json().await.ok();

        match body {
            Some(LoginResponse {
                token: Some(token),
                username: issued,
                ..
            }) if status.is_success() && !token.is_empty() => {
                let credential =
                    Credential::new(token, issued.unwrap_or_else(|| username.to_string()));
                self.credentials.set(credential.clone());
                info!(username = %credential.username(), "Login successful");
                Ok(credential)
            }
            body => {
                let message = body
                    .and_then(|b| b.message)
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| LOGIN_FAILED.to_string());
                warn!(%status, %message, "Login rejected");
                Err(ApiError::Auth(message))
            }
        }
    }

    /// Check that the held credential is still accepted by the hub.
    pub async fn validate_token(&self) -> ApiResult<()> {
        let url = self.url(&["api", "auth", "validate"])?;
        self.execute(self.client.get(url)).await?;
        Ok(())
    }

    /// Notify the hub (best effort) and drop the credential.
    pub async fn logout(&self) {
        if self.credentials.is_present() {
            match self.url(&["api", "auth", "logout"]) {
                Ok(url) => {
                    let request = self.credentials.attach(self.client.post(url));
                    if let Err(e) = request.send().await {
                        debug!(error = %e, "Logout notification failed, ignoring");
                    }
                }
                Err(e) => debug!(error = %e, "Skipping logout notification"),
            }
        }
        self.credentials.logout();
    }

    /// GET a JSON document.
    pub async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> ApiResult<T> {
        let url = self.url(segments)?;
        let response = self.execute(self.client.get(url)).await?;
        decode(response).await
    }

    /// Send a JSON body and decode the JSON response.
    pub async fn send_json<B, T>(&self, method: Method, segments: &[&str], body: &B) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(segments)?;
        let response = self
            .execute(self.client.request(method, url).json(body))
            .await?;
        decode(response).await
    }

    /// POST without a body; the response body is returned as text.
    pub async fn post_empty(&self, segments: &[&str]) -> ApiResult<String> {
        let url = self.url(segments)?;
        let response = self.execute(self.client.post(url)).await?;
        Ok(response.text().await?)
    }

    /// DELETE; any success status is accepted.
    pub async fn delete(&self, segments: &[&str]) -> ApiResult<()> {
        let url = self.url(segments)?;
        self.execute(self.client.delete(url)).await?;
        Ok(())
    }

    /// Send an authorized request and map the status.
    async fn execute(&self, request: RequestBuilder) -> ApiResult<Response> {
        let (request, generation) = self.credentials.attach_tagged(request);
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let message = error_message(status, response.text().await.unwrap_or_default());

        if status == StatusCode::UNAUTHORIZED {
            warn!(%message, "Hub rejected credential");
            Metrics::auth_rejected();
            if generation.is_some() {
                self.auth_rejected.send_replace(generation);
            }
            return Err(ApiError::Auth(message));
        }

        debug!(%status, %message, "Hub returned error status");
        Err(ApiError::Server {
            status: status.as_u16(),
            message,
        })
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Prefer a JSON `message` field, then the raw body, then the status text.
fn error_message(status: StatusCode, body: String) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
        if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
            return message.to_string();
        }
    }
    if !body.trim().is_empty() {
        return body;
    }
    status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
}
