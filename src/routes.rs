//! Gateway routing with the admission pipeline.
//!
//! # Middleware Stack
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response spans
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   Filter Chain   │ ← logging → rate limit (429) → auth (401)
//! └────────┬─────────┘
//!          │
//!          ▼
//!      Handler
//! ```
//!
//! # Routes
//!
//! - `GET /health` - Liveness (auth whitelisted by default)
//! - `/fallback/general` - Fixed 503 body (auth whitelisted by default)
//! - everything else - forwarded to the upstream service
//!
//! Every route, including health, passes through the whole filter chain.

use axum::Router;
use axum::routing::{any, get};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::filter::FilterChainLayer;
use crate::handlers;
use crate::state::AppState;

/// Build the gateway router with all routes and middleware configured.
///
/// # Arguments
///
/// * `state` - Gateway state providing the filter chain collaborators
///
/// # Returns
///
/// Fully configured Axum router ready to be served. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the peer address
/// is available for client IP resolution.
pub fn build_router(state: AppState) -> Router {
    let chain = state.filter_chain();
    info!(stages = ?chain.stage_names(), "Filter chain configured");

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/fallback/general", any(handlers::fallback_general))
        .fallback(handlers::proxy)
        .layer(FilterChainLayer::new(chain))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
