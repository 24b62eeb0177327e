//! Fixed-window, per-client rate limiting.
//!
//! # Algorithm
//!
//! Each client IP gets one counter per window, keyed `prefix + ip`. Every
//! admitted request increments the counter and the decision reads the
//! post-increment value (increment-then-compare, so the first request in a
//! window counts as 1):
//!
//! ```text
//! count = INCR(prefix + ip)      // window opens on first increment
//! allow = count <= max_requests
//! ```
//!
//! The counter disappears when the window expires, so the next request opens
//! a fresh window at 1.
//!
//! # Backends
//!
//! - [`LocalCounterStore`]: in-process registry, one gateway instance
//! - [`RedisCounterStore`]: shared counters across gateway instances
//!
//! The backend is chosen once at startup (`REDIS_URL` set or not) and used
//! through the [`CounterStore`] trait.
//!
//! # Failure Policy
//!
//! If the backend errors or times out, the request is **allowed** (fail
//! open). An outage of the counter store must not take down all traffic.

pub mod exclusion;
pub mod local;
pub mod redis_store;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::context::ClientContext;
use crate::error::GatewayResult;
use crate::metrics;

pub use exclusion::{ExclusionReason, ExclusionRules, IpRule};
pub use local::LocalCounterStore;
pub use redis_store::RedisCounterStore;

/// Boxed future returned by [`CounterStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Counter backend failure. Always handled by failing open.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Counter backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("Counter store has been shut down")]
    Closed,
}

/// Capability interface over the counting backends.
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` in its current window and return the
    /// post-increment count. The first increment of a key opens its window.
    fn increment<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Result<u64, BackendError>>;

    /// Backend name for logs and metrics.
    fn backend(&self) -> &'static str;

    /// Stop background work owned by the store.
    fn shutdown(&self) -> StoreFuture<'_, ()> {
        Box::pin(std::future::ready(()))
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Deny {
        /// Post-increment count that exceeded the ceiling
        count: u64,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allow)
    }
}

/// Per-client rate limiter over a [`CounterStore`].
#[derive(Clone)]
pub struct RateLimiter {
    enabled: bool,
    max_requests: u64,
    window: Duration,
    key_prefix: String,
    exclusions: Arc<ExclusionRules>,
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    /// Create a rate limiter.
    ///
    /// # Arguments
    ///
    /// * `max_requests` - Requests allowed per client per window
    /// * `window` - Window length (also the counter expiry)
    /// * `key_prefix` - Prepended to the client IP to form the counter key
    /// * `exclusions` - Rules exempting requests from counting
    /// * `store` - Counting backend
    pub fn new(
        max_requests: u64,
        window: Duration,
        key_prefix: impl Into<String>,
        exclusions: ExclusionRules,
        store: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            enabled: true,
            max_requests,
            window,
            key_prefix: key_prefix.into(),
            exclusions: Arc::new(exclusions),
            store,
        }
    }

    /// Build from application configuration.
    pub fn from_config(config: &Config, store: Arc<dyn CounterStore>) -> Self {
        let exclusions = ExclusionRules::new(
            &config.rate_limit_exception_ips,
            &config.rate_limit_exception_paths,
            &config.rate_limit_exception_api_keys,
        );
        Self::new(
            config.rate_limit_max_requests,
            config.rate_limit_window,
            config.rate_limit_key_prefix.clone(),
            exclusions,
            store,
        )
        .enabled(config.rate_limit_enabled)
    }

    /// Turn limiting on or off. A disabled limiter allows everything.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Configured ceiling per window.
    pub fn limit(&self) -> u64 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Counter key for a client IP.
    pub fn key_for(&self, client_ip: &str) -> String {
        format!("{}{}", self.key_prefix, client_ip)
    }

    /// Decide whether a request may proceed, failing open on backend errors.
    pub async fn admit(&self, ctx: &ClientContext) -> Admission {
        match self.check(ctx).await {
            Ok(admission) => admission,
            Err(e) => {
                warn!(
                    client_ip = %ctx.client_ip,
                    backend = self.store.backend(),
                    error = %e,
                    "Rate limit check failed, allowing request"
                );
                metrics::record_rate_limit_backend_error(self.store.backend());
                Admission::Allow
            }
        }
    }

    /// Decide whether a request may proceed, surfacing backend failures.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Backend` if the counter store errors or times out.
    pub async fn check(&self, ctx: &ClientContext) -> GatewayResult<Admission> {
        if !self.enabled {
            return Ok(Admission::Allow);
        }

        if let Some(reason) = self.exclusions.evaluate(ctx) {
            debug!(
                client_ip = %ctx.client_ip,
                path = %ctx.path,
                reason = %reason,
                "Request excluded from rate limit"
            );
            metrics::record_rate_limit_excluded(reason.as_str());
            return Ok(Admission::Allow);
        }

        let key = self.key_for(&ctx.client_ip);
        let count = self.store.increment(&key).await?;

        if count <= self.max_requests {
            debug!(client_ip = %ctx.client_ip, count, limit = self.max_requests, "Rate limit check passed");
            Ok(Admission::Allow)
        } else {
            warn!(
                client_ip = %ctx.client_ip,
                path = %ctx.path,
                count,
                limit = self.max_requests,
                "Rate limit exceeded for IP"
            );
            Ok(Admission::Deny { count })
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("enabled", &self.enabled)
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .field("key_prefix", &self.key_prefix)
            .field("backend", &self.store.backend())
            .finish()
    }
}
