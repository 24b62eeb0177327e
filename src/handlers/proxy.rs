//! Upstream forwarding and the fallback endpoint.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::response::{IntoResponse, Response};

use crate::error::GatewayError;
use crate::state::AppState;

/// Forward any unrouted request to the upstream service.
///
/// Upstream failures answer 503 with the uniform denial body.
pub async fn proxy(State(state): State<AppState>, req: Request<Body>) -> Response {
    match state.upstream.forward(req).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// `/fallback/general`: fixed 503 for circuit-broken routes.
pub async fn fallback_general() -> Response {
    GatewayError::Unavailable.into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_fallback_general() {
        let response = fallback_general().await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(
            bytes,
            r#"{"message":"Service is currently unavailable. Please try again later.","status":"503"}"#
        );
    }
}
