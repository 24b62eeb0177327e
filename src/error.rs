use std::borrow::Cow;

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::rate_limit::BackendError;

/// Gateway-wide error taxonomy with the HTTP status each variant maps to.
///
/// # Failure Policy
///
/// - `Backend` errors never reach clients from the admission pipeline: the
///   rate limiter fails open and only logs them. Callers of the strict
///   `RateLimiter::check` receive them as 503.
/// - `AuthService` errors fail closed: the request is denied with 401.
///
/// Variant payloads carry server-side detail for logs. Clients only ever see
/// the fixed message returned by [`GatewayError::public_message`].
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Missing or malformed Authorization header")]
    MissingCredentials,

    #[error("Token rejected by validation service")]
    InvalidToken,

    #[error("Token validation failed: {0}")]
    AuthService(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded {
        /// Seconds until the current window closes
        retry_after: u64,
        /// Configured ceiling per window
        limit: u64,
    },

    #[error("Counter backend failure: {0}")]
    Backend(String),

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Service unavailable")]
    Unavailable,

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<BackendError> for GatewayError {
    fn from(err: BackendError) -> Self {
        GatewayError::Backend(err.to_string())
    }
}

impl GatewayError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MissingCredentials
            | GatewayError::InvalidToken
            | GatewayError::AuthService(_) => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Backend(_) | GatewayError::Upstream(_) | GatewayError::Unavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Sanitized message safe to show to clients.
    pub fn public_message(&self) -> &'static str {
        match self {
            GatewayError::MissingCredentials => "Missing or invalid Authorization header",
            GatewayError::InvalidToken => "Invalid JWT token",
            GatewayError::AuthService(_) => "Authentication failed",
            GatewayError::RateLimitExceeded { .. } => "Rate limit exceeded",
            GatewayError::Backend(_) | GatewayError::Upstream(_) | GatewayError::Unavailable => {
                "Service is currently unavailable. Please try again later."
            }
            GatewayError::PayloadTooLarge { .. } => "Request body too large",
            GatewayError::ConfigError(_) => "Service configuration error. Please contact support.",
        }
    }

    /// Convert into the uniform denial rendered by the error responder.
    pub fn to_denial(&self) -> Denial {
        let denial = Denial::new(self.status(), self.public_message());
        match self {
            GatewayError::RateLimitExceeded { retry_after, limit } => denial
                .with_header("retry-after", retry_after.to_string())
                .with_header("x-ratelimit-limit", limit.to_string())
                .with_header("x-ratelimit-remaining", "0".to_string()),
            GatewayError::MissingCredentials
            | GatewayError::InvalidToken
            | GatewayError::AuthService(_) => {
                denial.with_header("www-authenticate", "Bearer".to_string())
            }
            _ => denial,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        // Full detail stays in the server log
        match self.status() {
            status if status.is_server_error() => {
                tracing::error!(error = %self, status = status.as_u16(), "Request failed");
            }
            status => {
                tracing::debug!(error = %self, status = status.as_u16(), "Request denied");
            }
        }
        self.to_denial().into_response()
    }
}

/// Uniform denial: status code, public message and optional extra headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub status: StatusCode,
    pub message: Cow<'static, str>,
    headers: Vec<(&'static str, String)>,
}

/// Wire shape of a denial body: `{"message": "...", "status": "429"}`.
#[derive(Serialize)]
struct DenialBody<'a> {
    message: &'a str,
    status: String,
}

impl Denial {
    pub fn new(status: StatusCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status,
            message: message.into(),
            headers: Vec::new(),
        }
    }

    fn with_header(mut self, name: &'static str, value: String) -> Self {
        self.headers.push((name, value));
        self
    }

    /// Serialize the JSON body.
    pub fn body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&DenialBody {
            message: &self.message,
            status: self.status.as_u16().to_string(),
        })
    }
}

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        let mut response = match self.body() {
            Ok(bytes) => {
                let mut response = Response::new(Body::from(bytes));
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                response
            }
            Err(e) => {
                // Close with the status and no body rather than failing the pipeline
                tracing::error!(error = %e, "Failed to serialize error response");
                Response::new(Body::empty())
            }
        };
        *response.status_mut() = self.status;

        for (name, value) in self.headers {
            if let Ok(value) = HeaderValue::from_str(&value) {
                response.headers_mut().insert(name, value);
            }
        }

        response
    }
}

/// Convenience type alias for Results with GatewayError.
pub type GatewayResult<T> = Result<T, GatewayError>;
