//! Audiobookshelf HTTP client using Reqwest

use bridge_traits::error::{BridgeError, Result};
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("tome-player/", env!("CARGO_PKG_VERSION"));

/// Reqwest-based client for an Audiobookshelf server.
///
/// Implements [`ContentSource`](bridge_traits::ContentSource) and
/// [`ProgressSink`](bridge_traits::ProgressSink). Requests carry the bearer
/// token set with [`set_token`](Self::set_token) or obtained by
/// [`login`](Self::login). Nothing is retried here; the core decides when to
/// ask again.
pub struct AbsHttpClient {
    pub(crate) client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
    pub(crate) client_version: String,
}

#[derive(Deserialize)]
struct LoginResponse {
    user: LoginUser,
}

#[derive(Deserialize)]
struct LoginUser {
    token: String,
}

impl AbsHttpClient {
    /// Create a client for the server at `base_url` with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        // No overall timeout; the core bounds each transfer.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                BridgeError::OperationFailed(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self::with_client(client, base_url))
    }

    /// Create a client around a preconfigured [`reqwest::Client`].
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            token: RwLock::new(None),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.set_token(token);
        self
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange credentials for an API token and keep it for later requests.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint("login"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .map_err(transport_error)?;

        let login: LoginResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Invalid login response: {}", e)))?;

        self.set_token(login.user.token);
        info!(user = username, "Logged in");
        Ok(())
    }

    /// Tell the server a playback session is over.
    pub async fn close_session(&self, session_id: &str) -> Result<()> {
        let response = self
            .authorized(
                self.client
                    .post(self.endpoint(&format!("api/session/{}/close", session_id))),
            )?
            .json(&json!({}))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;
        debug!(session_id, "Session closed");
        Ok(())
    }

    /// Absolute URL for an API path or a server-relative content URL.
    /// Absolute URLs pass through unchanged.
    pub fn endpoint(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        match self.token.read().as_deref() {
            Some(token) => Ok(request.bearer_auth(token)),
            None => Err(BridgeError::NotAvailable(
                "Not authenticated: call login() or set_token() first".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for AbsHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbsHttpClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

/// Map a non-success status to [`BridgeError::Http`] with the response body
/// as message.
pub(crate) async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        format!("{} returned {}", url, status)
    } else {
        format!("{} returned {}: {}", url, status, body.trim())
    };
    warn!(status = status.as_u16(), %url, "HTTP request rejected");
    Err(BridgeError::Http {
        status: status.as_u16(),
        message,
    })
}

pub(crate) fn transport_error(e: reqwest::Error) -> BridgeError {
    if e.is_timeout() {
        BridgeError::OperationFailed("Request timed out".to_string())
    } else if e.is_connect() {
        BridgeError::OperationFailed(format!("Connection failed: {}", e))
    } else {
        BridgeError::OperationFailed(e.to_string())
    }
}
