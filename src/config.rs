//! Gateway configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//! Configuration is resolved once at startup and read-only afterwards.
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_ENABLED`: Master switch (default: true)
//! - `RATE_LIMIT_MAX_REQUESTS`: Requests per client per window (default: 100)
//! - `RATE_LIMIT_WINDOW_SECS`: Window length (default: 60)
//! - `RATE_LIMIT_EXCEPTION_IPS`, `RATE_LIMIT_EXCEPTION_PATHS`,
//!   `RATE_LIMIT_EXCEPTION_API_KEYS`: Comma-separated exclusion rules
//! - `REDIS_URL`: Shared counters across instances; unset = in-process counters
//!
//! # Authentication
//!
//! - `AUTH_SERVICE_URL`: Token validation endpoint
//! - `AUTH_WHITELIST`: Comma-separated `[METHOD|METHOD ]PATTERN` entries that
//!   skip authentication (default: `/health,/fallback/**`)

use std::env;
use std::time::Duration;

use crate::auth::WhitelistEntry;
use crate::error::{GatewayError, GatewayResult};

/// Gateway configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Gateway will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8080)
    pub port: u16,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Master switch; a disabled limiter allows everything
    pub rate_limit_enabled: bool,

    /// Requests allowed per client per window (default: 100)
    pub rate_limit_max_requests: u64,

    /// Window length, also the counter expiry (default: 60s)
    pub rate_limit_window: Duration,

    /// Prepended to the client IP to form the counter key (default: "rate_limit:")
    pub rate_limit_key_prefix: String,

    /// Exact IPs, `a.b.c.d/32` or `a.b.c.0/24` entries exempt from limiting
    pub rate_limit_exception_ips: Vec<String>,

    /// Path patterns exempt from limiting
    pub rate_limit_exception_paths: Vec<String>,

    /// API keys exempt from limiting (`X-API-KEY` header or `api_key` query)
    pub rate_limit_exception_api_keys: Vec<String>,

    /// Redis connection URL; `None` selects the in-process counter store
    pub redis_url: Option<String>,

    /// Bound on each Redis increment (default: 500ms)
    pub redis_timeout: Duration,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// Token validation endpoint
    pub auth_service_url: String,

    /// Bound on one validation, including the wait for a worker permit (default: 5s)
    pub auth_timeout: Duration,

    /// Maximum validations in flight (default: 64)
    pub auth_max_concurrent_validations: usize,

    /// Routes that skip authentication
    pub auth_whitelist: Vec<WhitelistEntry>,

    // =========================================================================
    // Upstream Configuration
    // =========================================================================
    /// Base URL admitted requests are forwarded to
    pub upstream_url: String,

    /// Upstream request timeout (default: 30s)
    pub upstream_timeout: Duration,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

/// Default token validation endpoint.
pub const DEFAULT_AUTH_SERVICE_URL: &str = "http://localhost:8081/api/v1/auth/validate";

/// Default auth whitelist.
pub const DEFAULT_AUTH_WHITELIST: &str = "/health,/fallback/**";

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ConfigError` if any configuration is invalid
    /// (e.g., non-numeric PORT value, malformed whitelist entry).
    pub fn from_env() -> GatewayResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8080)?,

            // Rate limiting
            rate_limit_enabled: Self::parse_env("RATE_LIMIT_ENABLED", true)?,
            rate_limit_max_requests: Self::parse_env("RATE_LIMIT_MAX_REQUESTS", 100)?,
            rate_limit_window: Duration::from_secs(Self::parse_env("RATE_LIMIT_WINDOW_SECS", 60)?),
            rate_limit_key_prefix: env::var("RATE_LIMIT_KEY_PREFIX")
                .unwrap_or_else(|_| "rate_limit:".to_string()),
            rate_limit_exception_ips: parse_list(&env::var("RATE_LIMIT_EXCEPTION_IPS").unwrap_or_default()),
            rate_limit_exception_paths: parse_list(
                &env::var("RATE_LIMIT_EXCEPTION_PATHS").unwrap_or_default(),
            ),
            rate_limit_exception_api_keys: parse_list(
                &env::var("RATE_LIMIT_EXCEPTION_API_KEYS").unwrap_or_default(),
            ),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            redis_timeout: Duration::from_millis(Self::parse_env("REDIS_TIMEOUT_MS", 500)?),

            // Authentication
            auth_service_url: env::var("AUTH_SERVICE_URL")
                .unwrap_or_else(|_| DEFAULT_AUTH_SERVICE_URL.to_string()),
            auth_timeout: Duration::from_millis(Self::parse_env("AUTH_TIMEOUT_MS", 5000)?),
            auth_max_concurrent_validations: Self::parse_env("AUTH_MAX_CONCURRENT_VALIDATIONS", 64)?,
            auth_whitelist: parse_whitelist(
                &env::var("AUTH_WHITELIST").unwrap_or_else(|_| DEFAULT_AUTH_WHITELIST.to_string()),
            )?,

            // Upstream
            upstream_url: env::var("UPSTREAM_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            upstream_timeout: Duration::from_secs(Self::parse_env("UPSTREAM_TIMEOUT_SECS", 30)?),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ConfigError` if validation fails.
    fn validate(&self) -> GatewayResult<()> {
        if self.rate_limit_enabled {
            if self.rate_limit_max_requests == 0 {
                return Err(GatewayError::ConfigError(
                    "RATE_LIMIT_MAX_REQUESTS must be greater than 0".to_string(),
                ));
            }
            if self.rate_limit_window.is_zero() {
                return Err(GatewayError::ConfigError(
                    "RATE_LIMIT_WINDOW_SECS must be greater than 0".to_string(),
                ));
            }
        }

        if self.auth_max_concurrent_validations == 0 {
            return Err(GatewayError::ConfigError(
                "AUTH_MAX_CONCURRENT_VALIDATIONS must be greater than 0".to_string(),
            ));
        }

        if self.auth_timeout.is_zero() {
            return Err(GatewayError::ConfigError(
                "AUTH_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        for (name, url) in [
            ("AUTH_SERVICE_URL", Some(self.auth_service_url.as_str())),
            ("UPSTREAM_URL", Some(self.upstream_url.as_str())),
            ("REDIS_URL", self.redis_url.as_deref()),
        ] {
            if let Some(url) = url
                && let Err(e) = reqwest::Url::parse(url)
            {
                return Err(GatewayError::ConfigError(format!("Invalid {name}: {e}")));
            }
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if the distributed counter backend is configured.
    pub fn distributed_rate_limiting(&self) -> bool {
        self.redis_url.is_some()
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> GatewayResult<T>
    where
        T: std::str::FromStr + ToString,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| GatewayError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse comma-separated `[METHOD|METHOD ]PATTERN` whitelist entries.
///
/// # Errors
///
/// Returns `GatewayError::ConfigError` naming the first malformed entry.
pub fn parse_whitelist(raw: &str) -> GatewayResult<Vec<WhitelistEntry>> {
    parse_list(raw)
        .iter()
        .map(|entry| {
            WhitelistEntry::parse(entry)
                .map_err(|e| GatewayError::ConfigError(format!("Invalid AUTH_WHITELIST: {e}")))
        })
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 8080,
            // Rate limiting
            rate_limit_enabled: true,
            rate_limit_max_requests: 100,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_key_prefix: "rate_limit:".to_string(),
            rate_limit_exception_ips: vec![],
            rate_limit_exception_paths: vec![],
            rate_limit_exception_api_keys: vec![],
            redis_url: None, // in-process counters
            redis_timeout: Duration::from_millis(500),
            // Authentication
            auth_service_url: DEFAULT_AUTH_SERVICE_URL.to_string(),
            auth_timeout: Duration::from_secs(5),
            auth_max_concurrent_validations: 64,
            auth_whitelist: vec![
                WhitelistEntry::any_method("/health"),
                WhitelistEntry::any_method("/fallback/**"),
            ],
            // Upstream
            upstream_url: "http://localhost:3000".to_string(),
            upstream_timeout: Duration::from_secs(30),
            // Observability
            log_level: "info".to_string(),
            metrics_port: 9090,
        }
    }
}
