//! Liveness endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use tracing::instrument;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "healthy" while the process serves requests
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
    /// Counter backend in use ("local" or "redis")
    pub rate_limit_backend: &'static str,
    /// Whether rate limiting is switched on
    pub rate_limit_enabled: bool,
    /// Seconds since startup
    pub uptime_seconds: u64,
}

/// Health check endpoint.
///
/// Whitelisted for authentication by default. Still subject to rate
/// limiting like any other route.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "rate_limit_backend": "local",
///   "rate_limit_enabled": true,
///   "uptime_seconds": 42
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        rate_limit_backend: state.rate_limiter.backend(),
        rate_limit_enabled: state.rate_limiter.is_enabled(),
        uptime_seconds: state.uptime_seconds(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy",
            version: "0.1.0",
            rate_limit_backend: "redis",
            rate_limit_enabled: true,
            uptime_seconds: 3,
        };

        let json = serde_json::to_string(&response).expect("Serialization should succeed");
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"rate_limit_backend\":\"redis\""));
    }
}
