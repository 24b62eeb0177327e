//! Async HTTP client for the token validation service.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::{AuthError, TokenValidation, TokenValidator, ValidationFuture};

#[derive(Serialize)]
struct ValidationRequest<'a> {
    token: &'a str,
}

/// Validates tokens with `POST {url}` and body `{"token": "..."}`.
///
/// Any non-2xx status, undecodable body or transport error is an
/// [`AuthError`]; the caller denies the request.
#[derive(Debug, Clone)]
pub struct HttpTokenValidator {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpTokenValidator {
    /// Build a validator with its own connection pool.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, url, timeout))
    }

    /// Build a validator on a shared `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn validate_token(&self, token: &str) -> Result<TokenValidation, AuthError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&ValidationRequest { token })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status(status.as_u16()));
        }

        let validation = response.json::<TokenValidation>().await.map_err(|e| {
            if e.is_timeout() {
                AuthError::Timeout(self.timeout)
            } else {
                AuthError::Decode(e.to_string())
            }
        })?;

        debug!(
            is_valid = validation.is_valid,
            user_id = validation.user_id.as_deref().unwrap_or(""),
            "Token validation response received"
        );
        Ok(validation)
    }

    fn transport_error(&self, e: reqwest::Error) -> AuthError {
        if e.is_timeout() {
            AuthError::Timeout(self.timeout)
        } else {
            AuthError::Transport(e.to_string())
        }
    }
}

impl TokenValidator for HttpTokenValidator {
    fn validate<'a>(&'a self, token: &'a str) -> ValidationFuture<'a> {
        Box::pin(self.validate_token(token))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
