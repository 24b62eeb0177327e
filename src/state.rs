//! Shared gateway state.
//!
//! Owns the long-lived collaborators built once at startup:
//!
//! - **Counter store**: local registry or Redis, chosen by `REDIS_URL`
//! - **Rate limiter**: configured ceiling, window and exclusions over the store
//! - **Token validator**: client for the authentication service
//! - **Upstream**: forwarder for admitted requests
//!
//! # Lifecycle
//!
//! The local counter store runs a background reaper task. Call `shutdown()`
//! after the server stops to end it cleanly.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::auth::{HttpTokenValidator, TokenValidator, Whitelist};
use crate::config::Config;
use crate::error::{GatewayError, GatewayResult};
use crate::filter::{
    FilterChain, GatewayFilter, JwtAuthFilter, RateLimitFilter, RequestLoggingFilter,
};
use crate::rate_limit::{CounterStore, LocalCounterStore, RateLimiter, RedisCounterStore};
use crate::upstream::Upstream;

/// Shared gateway state for Axum handlers and the filter chain.
///
/// Cloned per request; every field is an `Arc` or cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Gateway configuration
    pub config: Arc<Config>,
    /// Per-client rate limiter
    pub rate_limiter: RateLimiter,
    /// Token validation service client
    pub validator: Arc<dyn TokenValidator>,
    /// Forwarder for admitted requests
    pub upstream: Upstream,
    /// Timestamp when the gateway started
    pub started_at: Instant,
    store: Arc<dyn CounterStore>,
}

impl AppState {
    /// Build state from configuration.
    ///
    /// Must be called inside a Tokio runtime (the local counter store spawns
    /// its reaper task).
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ConfigError` if a client cannot be built.
    pub fn new(config: Config) -> GatewayResult<Self> {
        let store: Arc<dyn CounterStore> = match &config.redis_url {
            Some(url) => Arc::new(
                RedisCounterStore::new(url, config.rate_limit_window, config.redis_timeout)
                    .map_err(|e| GatewayError::ConfigError(format!("Invalid REDIS_URL: {e}")))?,
            ),
            None => Arc::new(LocalCounterStore::new(config.rate_limit_window)),
        };

        let validator = Arc::new(
            HttpTokenValidator::new(config.auth_service_url.clone(), config.auth_timeout)
                .map_err(|e| GatewayError::ConfigError(e.to_string()))?,
        );

        Self::with_parts(config, store, validator)
    }

    /// Build state from explicit collaborators (tests, embedding).
    pub fn with_parts(
        config: Config,
        store: Arc<dyn CounterStore>,
        validator: Arc<dyn TokenValidator>,
    ) -> GatewayResult<Self> {
        let upstream = Upstream::new(&config.upstream_url, config.upstream_timeout)?;
        let rate_limiter = RateLimiter::from_config(&config, store.clone());

        info!(
            backend = store.backend(),
            enabled = rate_limiter.is_enabled(),
            max_requests = rate_limiter.limit(),
            window_secs = rate_limiter.window().as_secs(),
            validator = validator.name(),
            upstream = %upstream.base_url(),
            "Gateway state initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            rate_limiter,
            validator,
            upstream,
            started_at: Instant::now(),
            store,
        })
    }

    /// Assemble the admission pipeline: logging → rate limit → auth.
    pub fn filter_chain(&self) -> FilterChain {
        let filters: Vec<Arc<dyn GatewayFilter>> = vec![
            Arc::new(RequestLoggingFilter::new()),
            Arc::new(RateLimitFilter::new(self.rate_limiter.clone())),
            Arc::new(JwtAuthFilter::new(
                Whitelist::new(self.config.auth_whitelist.clone()),
                self.validator.clone(),
                self.config.auth_max_concurrent_validations,
                self.config.auth_timeout,
            )),
        ];
        FilterChain::new(filters)
    }

    /// Stop background work owned by the counter store.
    pub async fn shutdown(&self) {
        info!(backend = self.store.backend(), "Shutting down rate limit counter store");
        self.store.shutdown().await;
    }

    /// Get the gateway uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("rate_limiter", &self.rate_limiter)
            .field("validator", &self.validator.name())
            .field("upstream", &self.upstream.base_url())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_backend_without_redis_url() {
        let state = AppState::new(Config::default()).unwrap();
        assert_eq!(state.rate_limiter.backend(), "local");
        assert_eq!(state.validator.name(), "http");
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_redis_backend_with_redis_url() {
        let config = Config {
            redis_url: Some("redis://127.0.0.1:6379".to_string()),
            ..Config::default()
        };
        let state = AppState::new(config).unwrap();
        assert_eq!(state.rate_limiter.backend(), "redis");
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_filter_chain_order() {
        let state = AppState::new(Config::default()).unwrap();
        assert_eq!(
            state.filter_chain().stage_names(),
            vec!["logging", "rate_limit", "auth"]
        );
        state.shutdown().await;
    }
}
