//! Token validation against the external authentication service.
//!
//! The gateway never decodes JWTs itself. Every token-bearing request is sent
//! to the validation service, and the result is never cached.
//!
//! # Validators
//!
//! - [`HttpTokenValidator`]: async `reqwest` client, `POST {"token": "..."}`
//! - [`BlockingTokenValidator`]: wraps a synchronous validation function and
//!   runs it on tokio's blocking pool
//!
//! Both are used through the [`TokenValidator`] trait so the auth stage does
//! not care which one is configured.
//!
//! # Response Contract
//!
//! ```json
//! {"isValid": true, "userId": "u-1", "email": "a@b.c", "roles": ["admin", "user"]}
//! ```
//!
//! `roles` may also be a single comma-separated string.

pub mod blocking;
pub mod client;
pub mod whitelist;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

pub use blocking::BlockingTokenValidator;
pub use client::HttpTokenValidator;
pub use whitelist::{Whitelist, WhitelistEntry};

/// Boxed future returned by [`TokenValidator::validate`].
pub type ValidationFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TokenValidation, AuthError>> + Send + 'a>>;

/// Validation service failure. Always handled by failing closed.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Validation request failed: {0}")]
    Transport(String),

    #[error("Validation service returned HTTP {0}")]
    Status(u16),

    #[error("Invalid validation response: {0}")]
    Decode(String),

    #[error("Validation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Validation worker failed: {0}")]
    Worker(String),
}

/// Result of validating one token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenValidation {
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_roles")]
    pub roles: Option<String>,
}

impl TokenValidation {
    /// Valid result carrying an identity.
    pub fn valid(user_id: &str, email: &str, roles: &str) -> Self {
        Self {
            is_valid: true,
            user_id: Some(user_id.to_string()),
            email: Some(email.to_string()),
            roles: Some(roles.to_string()),
        }
    }

    /// Result for a rejected token.
    pub fn invalid() -> Self {
        Self::default()
    }
}

/// Accept `"a,b"` or `["a", "b"]`; both become `"a,b"`.
fn deserialize_roles<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Roles {
        Joined(String),
        List(Vec<String>),
    }

    Ok(match Option::<Roles>::deserialize(deserializer)? {
        Some(Roles::Joined(roles)) => Some(roles),
        Some(Roles::List(roles)) => Some(roles.join(",")),
        None => None,
    })
}

/// Capability interface over the token validation service.
pub trait TokenValidator: Send + Sync {
    /// Validate a bearer token (without the `Bearer ` prefix).
    fn validate<'a>(&'a self, token: &'a str) -> ValidationFuture<'a>;

    /// Validator name for logs.
    fn name(&self) -> &'static str;
}
