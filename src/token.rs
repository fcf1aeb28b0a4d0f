//! OAuth2 refresh-token exchange.
//!
//! [`TokenClient`] trades a long-lived refresh token for a short-lived access
//! token with a form-encoded POST (`grant_type=refresh_token`). Transport
//! failures and 5xx responses are retried with doubling backoff; 4xx responses
//! end the exchange immediately.

use crate::config::{expose, Credentials, PipelineConfig, RetryConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::SecretString;
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// `User-Agent` sent to the token endpoint.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Maximum number of characters of an error body kept in [`Error::TokenExchangeFailed`].
pub const MAX_ERROR_BODY_CHARS: usize = 500;

/// Short-lived bearer credential for one mailbox session.
#[derive(Clone)]
pub struct AccessToken {
    token: SecretString,
    expires_in: Option<Duration>,
    token_type: Option<String>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

impl AccessToken {
    /// Wraps a bearer token obtained elsewhere.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_in: None,
            token_type: None,
        }
    }

    /// Returns the token, still wrapped.
    #[must_use]
    pub fn secret(&self) -> &SecretString {
        &self.token
    }

    /// Lifetime reported by the endpoint, if any.
    #[must_use]
    pub fn expires_in(&self) -> Option<Duration> {
        self.expires_in
    }

    /// Token type reported by the endpoint (usually `Bearer`), if any.
    #[must_use]
    pub fn token_type(&self) -> Option<&str> {
        self.token_type.as_deref()
    }
}

/// Produces access tokens for a credential bundle.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Exchanges the bundle's refresh token for a fresh access token.
    async fn access_token(&self, credentials: &Credentials) -> Result<AccessToken>;
}

/// Successful token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    // Some endpoints send a number, others a numeric string.
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

impl TokenResponse {
    fn into_access_token(self, status: StatusCode) -> Result<AccessToken> {
        let token = self
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or(Error::MissingAccessToken {
                status: status.as_u16(),
            })?;

        let expires_in = self
            .expires_in
            .and_then(|v| v.as_u64().or_else(|| v.as_str()?.parse().ok()))
            .map(Duration::from_secs);

        Ok(AccessToken {
            token: SecretString::from(token),
            expires_in,
            token_type: self.token_type,
        })
    }
}

/// Why a single attempt failed.
enum AttemptError {
    /// Non-2xx response.
    Status { status: StatusCode, body: String },
    /// No response at all.
    Transport(reqwest::Error),
    /// A response that retrying cannot fix.
    Fatal(Error),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Status { status, .. } => status.is_server_error(),
            AttemptError::Transport(e) => !e.is_builder(),
            AttemptError::Fatal(_) => false,
        }
    }

    fn into_error(self, attempts: u32) -> Error {
        match self {
            AttemptError::Status { status, body } => Error::TokenExchangeFailed {
                status: Some(status.as_u16()),
                attempts,
                detail: truncate_chars(&body, MAX_ERROR_BODY_CHARS),
                source: None,
            },
            AttemptError::Transport(source) => Error::TokenExchangeFailed {
                status: None,
                attempts,
                detail: source.to_string(),
                source: Some(source),
            },
            AttemptError::Fatal(e) => e,
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Status { status, .. } => write!(f, "HTTP {status}"),
            AttemptError::Transport(e) => write!(f, "{e}"),
            AttemptError::Fatal(e) => write!(f, "{e}"),
        }
    }
}

/// HTTP client for an OAuth2 token endpoint.
///
/// One instance can serve any number of concurrent exchanges.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    config: PipelineConfig,
}

impl TokenClient {
    /// Creates a client using the timeouts, retry policy and endpoint
    /// discovery of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HttpClient`] if the TLS backend cannot be initialized.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeouts.token_connect)
            .timeout(config.timeouts.token_request)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|source| Error::HttpClient { source })?;

        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry(&self) -> &RetryConfig {
        &self.config.retry
    }

    /// Exchanges a refresh token at `token_url`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidCredential`] if the refresh token or client id is blank
    ///   (no request is sent)
    /// - [`Error::TokenExchangeFailed`] on a 4xx response, or once every attempt
    ///   failed with a 5xx or a transport error
    /// - [`Error::MissingAccessToken`] / [`Error::TokenResponse`] for an unusable
    ///   2xx body
    #[instrument(
        name = "TokenClient::exchange",
        skip_all,
        fields(token_url = %token_url, client_id = %client_id)
    )]
    pub async fn exchange(
        &self,
        token_url: &str,
        refresh_token: &SecretString,
        client_id: &str,
        client_secret: Option<&SecretString>,
    ) -> Result<AccessToken> {
        let refresh_token = expose(refresh_token).trim();
        let client_id = client_id.trim();

        if refresh_token.is_empty() {
            return Err(Error::InvalidCredential {
                message: "refresh token is empty".into(),
            });
        }
        if client_id.is_empty() {
            return Err(Error::InvalidCredential {
                message: "client id is empty".into(),
            });
        }

        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("refresh_token", refresh_token),
        ];
        if let Some(secret) = client_secret {
            params.push(("client_secret", expose(secret)));
        }

        let params = &params;
        with_retry(&self.config.retry, move || self.attempt(token_url, params)).await
    }

    async fn attempt(
        &self,
        token_url: &str,
        params: &[(&str, &str)],
    ) -> std::result::Result<AccessToken, AttemptError> {
        let response = self
            .http
            .post(token_url)
            .form(params)
            .send()
            .await
            .map_err(AttemptError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(AttemptError::Transport)?;

        if !status.is_success() {
            return Err(AttemptError::Status { status, body });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|source| AttemptError::Fatal(Error::TokenResponse { source }))?;

        parsed.into_access_token(status).map_err(AttemptError::Fatal)
    }
}

#[async_trait]
impl TokenSource for TokenClient {
    async fn access_token(&self, credentials: &Credentials) -> Result<AccessToken> {
        let token_url = self.config.provider_for(credentials.email()).token_url;

        self.exchange(
            &token_url,
            credentials.refresh_token(),
            credentials.client_id(),
            credentials.client_secret(),
        )
        .await
    }
}

/// Runs `op` until it succeeds, fails terminally or uses up
/// `retry.max_attempts`. Sleeps `backoff_after(n)` after failed attempt `n`,
/// never after the last one.
async fn with_retry<T, F, Fut>(retry: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, AttemptError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        let failure = match op().await {
            Ok(value) => {
                debug!(attempt, "Access token obtained");
                return Ok(value);
            }
            Err(failure) => failure,
        };

        if !failure.is_retryable() || attempt >= retry.max_attempts {
            debug!(attempt, error = %failure, "Token exchange failed");
            return Err(failure.into_error(attempt));
        }

        let delay = retry.backoff_after(attempt);
        warn!(
            attempt,
            max_attempts = retry.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %failure,
            "Token exchange attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
