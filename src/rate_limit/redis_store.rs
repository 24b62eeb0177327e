//! Redis-backed counters shared by every gateway instance.
//!
//! Uses the INCR + PEXPIRE counter pattern. Both commands run in one Lua
//! script, so a crash between them cannot leave a counter without expiry:
//!
//! ```text
//! count = INCR key
//! if count == 1 then PEXPIRE key window_ms end
//! return count
//! ```
//!
//! Redis reaps expired counters itself; no client-side sweep is needed.
//!
//! # Connection Handling
//!
//! The connection is opened lazily on the first increment and reused
//! (`ConnectionManager` reconnects on its own). If Redis is unreachable at
//! startup the gateway still starts; increments fail and the limiter fails
//! open until Redis is back.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tokio::sync::OnceCell;
use tracing::info;

use super::{BackendError, CounterStore, StoreFuture};

const INCREMENT_SCRIPT: &str = r"local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count";

/// Distributed fixed-window counters.
pub struct RedisCounterStore {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    script: Script,
    window: Duration,
    timeout: Duration,
}

impl RedisCounterStore {
    /// Create a store for `redis_url`. Only the URL is validated here.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - e.g. `redis://localhost:6379`
    /// * `window` - Counter expiry, set on the first increment of a key
    /// * `timeout` - Bound on each increment, connection setup included
    pub fn new(redis_url: &str, window: Duration, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::open(redis_url)?;
        info!(
            window_secs = window.as_secs_f64(),
            timeout_ms = timeout.as_millis() as u64,
            "Redis rate limit counter store configured"
        );
        Ok(Self {
            client,
            connection: OnceCell::new(),
            script: Script::new(INCREMENT_SCRIPT),
            window,
            timeout,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, BackendError> {
        let manager = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(manager.clone())
    }

    async fn increment_inner(&self, key: &str) -> Result<u64, BackendError> {
        let mut conn = self.connection().await?;
        let window_ms = u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX);

        let count: i64 = self
            .script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Current count for a key (for monitoring), 0 when absent.
    pub async fn current_count(&self, key: &str) -> Result<u64, BackendError> {
        let mut conn = self.connection().await?;
        let count: Option<u64> = conn.get(key).await?;
        Ok(count.unwrap_or(0))
    }

    /// Delete a key's counter, closing its window early.
    pub async fn reset(&self, key: &str) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

impl CounterStore for RedisCounterStore {
    fn increment<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Result<u64, BackendError>> {
        Box::pin(async move {
            tokio::time::timeout(self.timeout, self.increment_inner(key))
                .await
                .map_err(|_| BackendError::Timeout(self.timeout))?
        })
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("window", &self.window)
            .field("timeout", &self.timeout)
            .field("connected", &self.connection.initialized())
            .finish()
    }
}
