//! Authentication stage: whitelist bypass, bearer extraction, remote validation.
//!
//! # Decision Order
//!
//! 1. Path + method whitelisted → forward unchanged
//! 2. No `Authorization: Bearer <token>` → 401 "Missing or invalid Authorization header"
//! 3. Validation service says invalid → 401 "Invalid JWT token"
//! 4. Validation call fails (transport, status, decode, timeout) → 401
//!    "Authentication failed"
//! 5. Valid → forward with `X-User-Id`, `X-User-Email`, `X-User-Roles`
//!
//! Validation failures fail **closed**.
//!
//! # Concurrency
//!
//! At most `max_concurrent` validations are in flight; further requests wait
//! for a permit. The timeout covers the wait and the call together.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, HeaderValue};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{FilterFuture, GatewayFilter, Verdict, order};
use crate::auth::{AuthError, TokenValidation, TokenValidator, Whitelist};
use crate::context::ClientContext;
use crate::error::GatewayError;
use crate::metrics;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_ROLES_HEADER: &str = "x-user-roles";

/// Headers carrying the authenticated identity downstream.
pub const IDENTITY_HEADERS: [&str; 3] = [USER_ID_HEADER, USER_EMAIL_HEADER, USER_ROLES_HEADER];

/// Case-sensitive, single space.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Token after the `Bearer ` prefix, if present and non-empty.
pub fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    authorization?
        .strip_prefix(BEARER_PREFIX)
        .filter(|token| !token.is_empty())
}

/// Keeps the in-flight gauge right even when the request future is dropped.
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        metrics::add_auth_validations_in_flight(1.0);
        InFlight
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        metrics::add_auth_validations_in_flight(-1.0);
    }
}

/// Bearer-token authentication against an external validation service.
#[derive(Clone)]
pub struct JwtAuthFilter {
    whitelist: Arc<Whitelist>,
    validator: Arc<dyn TokenValidator>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl JwtAuthFilter {
    /// Create the stage.
    ///
    /// # Arguments
    ///
    /// * `whitelist` - Routes that skip authentication
    /// * `validator` - Token validation service client
    /// * `max_concurrent` - Bound on in-flight validations (at least 1)
    /// * `timeout` - Bound on permit wait plus validation call
    pub fn new(
        whitelist: Whitelist,
        validator: Arc<dyn TokenValidator>,
        max_concurrent: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            whitelist: Arc::new(whitelist),
            validator,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    async fn validate(&self, token: &str) -> Result<TokenValidation, AuthError> {
        let call = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| AuthError::Worker("validation permits closed".to_string()))?;
            let _in_flight = InFlight::enter();
            self.validator.validate(token).await
        };

        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| AuthError::Timeout(self.timeout))?
    }

    async fn authenticate(&self, ctx: &ClientContext) -> Verdict {
        if self.whitelist.is_whitelisted(&ctx.path, &ctx.method) {
            debug!(path = %ctx.path, method = %ctx.method, "Skipping authentication for whitelisted route");
            return Verdict::forward();
        }

        let Some(token) = bearer_token(ctx.authorization.as_deref()) else {
            warn!(
                path = %ctx.path,
                client_ip = %ctx.client_ip,
                "Missing or invalid Authorization header"
            );
            return Verdict::Deny(GatewayError::MissingCredentials);
        };

        let started = Instant::now();
        let result = self.validate(token).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(validation) if validation.is_valid => {
                metrics::record_auth_validation("valid", elapsed);
                match identity_headers(&validation) {
                    Ok(headers) => {
                        debug!(
                            user_id = validation.user_id.as_deref().unwrap_or(""),
                            path = %ctx.path,
                            "Token validated"
                        );
                        Verdict::Forward(headers)
                    }
                    Err(e) => {
                        warn!(error = %e, "Identity from validation service is not a valid header value");
                        Verdict::Deny(GatewayError::AuthService(e.to_string()))
                    }
                }
            }
            Ok(_) => {
                metrics::record_auth_validation("invalid", elapsed);
                warn!(path = %ctx.path, client_ip = %ctx.client_ip, "Invalid JWT token");
                Verdict::Deny(GatewayError::InvalidToken)
            }
            Err(e) => {
                metrics::record_auth_validation("error", elapsed);
                warn!(
                    path = %ctx.path,
                    validator = self.validator.name(),
                    error = %e,
                    "Token validation failed, denying request"
                );
                Verdict::Deny(GatewayError::AuthService(e.to_string()))
            }
        }
    }
}

/// Build the identity headers. Absent fields become empty values.
fn identity_headers(
    validation: &TokenValidation,
) -> Result<HeaderMap, axum::http::header::InvalidHeaderValue> {
    let mut headers = HeaderMap::new();
    for (name, value) in [
        (USER_ID_HEADER, &validation.user_id),
        (USER_EMAIL_HEADER, &validation.email),
        (USER_ROLES_HEADER, &validation.roles),
    ] {
        headers.insert(name, HeaderValue::from_str(value.as_deref().unwrap_or(""))?);
    }
    Ok(headers)
}

impl GatewayFilter for JwtAuthFilter {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn order(&self) -> i32 {
        order::AUTH
    }

    fn apply<'a>(&'a self, ctx: &'a ClientContext) -> FilterFuture<'a> {
        Box::pin(self.authenticate(ctx))
    }
}

impl std::fmt::Debug for JwtAuthFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthFilter")
            .field("whitelist", &self.whitelist.len())
            .field("validator", &self.validator.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}
