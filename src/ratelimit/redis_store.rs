//! Redis-backed window store.
//!
//! Provides the distributed backend: every application instance pointing at
//! the same Redis shares the same windows.
//!
//! ## Architecture
//!
//! - Keys: the [`LimitKey`] string, value is the integer count
//! - TTL: the window length, set with `PX` when the window opens
//! - Counting: one Lua script, so Redis runs read-check-increment as a unit
//!
//! The script is loaded once by [`WindowStore::prepare`] and then invoked by
//! its SHA1. If Redis forgets it (restart, `SCRIPT FLUSH`) the invocation
//! reloads it transparently.
//!
//! Errors are not swallowed: a failed round-trip surfaces to the caller, so
//! an unreachable Redis rejects traffic instead of admitting it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use gatekeeper::ratelimit::{Limiter, LimiterSettings, RedisWindowStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> gatekeeper::error::Result<()> {
//!     let store = RedisWindowStore::connect("redis://127.0.0.1/").await?;
//!     let limiter = Limiter::new(LimiterSettings::default());
//!     limiter.init(Arc::new(store)).await?;
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::{debug, info, trace};

use super::key::LimitKey;
use super::store::WindowStore;
use crate::error::{GatekeeperError, Result};

/// Fixed-window counting script.
///
/// `KEYS[1]` is the window key, `ARGV[1]` the limit, `ARGV[2]` the window in
/// milliseconds. Returns 0 when admitted, else the key's remaining TTL in ms.
/// A full window without a TTL is reopened rather than blocking forever.
pub const FIXED_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = ARGV[2]
local current = tonumber(redis.call('GET', key) or '0')
if current > 0 then
    if current + 1 > limit then
        local ttl = redis.call('PTTL', key)
        if ttl > 0 then
            return ttl
        end
        redis.call('SET', key, 1, 'PX', window)
        return 0
    end
    redis.call('INCR', key)
    return 0
end
redis.call('SET', key, 1, 'PX', window)
return 0
"#;

/// Redis window store shared by every instance of an application.
pub struct RedisWindowStore {
    connection: Mutex<Option<ConnectionManager>>,
    script: Script,
}

impl fmt::Debug for RedisWindowStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisWindowStore")
            .field("script_sha", &self.script.get_hash())
            .field("connected", &self.connection.lock().is_some())
            .finish()
    }
}

impl RedisWindowStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1/")
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        debug!(url = %url, "Connected to Redis");
        Ok(Self::from_connection(connection))
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self {
            connection: Mutex::new(Some(connection)),
            script: Script::new(FIXED_WINDOW_SCRIPT),
        }
    }

    /// SHA1 the script is invoked by.
    pub fn script_sha(&self) -> &str {
        self.script.get_hash()
    }

    /// Clone the connection handle out so no lock is held across awaits.
    fn connection(&self) -> Result<ConnectionManager> {
        self.connection
            .lock()
            .clone()
            .ok_or(GatekeeperError::NotInitialized)
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn prepare(&self) -> Result<()> {
        let mut conn = self.connection()?;
        let sha = self.script.prepare_invoke().load_async(&mut conn).await?;
        info!(sha = %sha, "Loaded fixed-window script into Redis");
        Ok(())
    }

    async fn hit(&self, key: &LimitKey, limit: u64, window: Duration) -> Result<u64> {
        let mut conn = self.connection()?;
        let window_ms = window.as_millis() as u64;

        let wait: i64 = self
            .script
            .key(key.as_str())
            .arg(limit)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        trace!(key = %key, limit = limit, wait_ms = wait, "Counted hit in Redis");
        Ok(wait.max(0) as u64)
    }

    async fn count(&self, key: &LimitKey) -> Result<Option<u64>> {
        let mut conn = self.connection()?;
        let count: Option<u64> = conn.get(key.as_str()).await?;
        Ok(count)
    }

    async fn close(&self) -> Result<()> {
        if self.connection.lock().take().is_some() {
            info!("Closed Redis window store");
        }
        Ok(())
    }
}
