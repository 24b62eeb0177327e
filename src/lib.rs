//! # Admission Gateway
//!
//! The request-admission layer of an API gateway on Axum, featuring:
//!
//! - **Rate Limiting**: Fixed-window per-IP counters, in-process or Redis-backed
//! - **Exclusions**: IP (`/32`, `/24`), path pattern and API key exemptions
//! - **Authentication**: Bearer tokens validated by an external service,
//!   identity forwarded as `X-User-*` headers
//! - **Filter Chain**: Ordered stages with short-circuit on the first denial
//! - **Observability**: Structured logging, request IDs, Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  FilterChainLayer (logging → rate limit → auth)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RateLimiter ── CounterStore (LocalCounterStore | Redis)    │
//! │  JwtAuthFilter ── Whitelist, TokenValidator                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, fallback, upstream proxy)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//! use admission_gateway::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config)?;
//!     let app = build_router(state.clone());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//!     state.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Embedding the Pipeline
//!
//! [`FilterChainLayer`] wraps any tower service, so the admission pipeline
//! can sit in front of an existing router instead of the built-in proxy.

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod metrics;
pub mod pattern;
pub mod rate_limit;
pub mod routes;
pub mod state;
pub mod upstream;

// Re-exports for convenience
pub use config::Config;
pub use context::ClientContext;
pub use error::{Denial, GatewayError, GatewayResult};
pub use filter::{FilterChain, FilterChainLayer, GatewayFilter, Verdict};
pub use rate_limit::{CounterStore, LocalCounterStore, RateLimiter, RedisCounterStore};
pub use routes::build_router;
pub use state::AppState;
