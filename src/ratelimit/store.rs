//! Window store trait abstracting the shared counter backends.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

use super::key::LimitKey;
use crate::error::Result;

/// A store that owns every window's count and expiry.
///
/// Implementations must make [`WindowStore::hit`] indivisible per key: no
/// other caller may observe or mutate the key between reading the count and
/// writing it back. The Redis backend gets this from a server-side script,
/// the in-memory backend from its per-key shard lock.
#[async_trait]
pub trait WindowStore: Send + Sync + Debug {
    /// Make the store ready for counting (load scripts, verify connectivity).
    async fn prepare(&self) -> Result<()>;

    /// Count one request against `key`.
    ///
    /// Returns `0` when the request fits in the window, or the number of
    /// milliseconds until the window resets when it doesn't. A rejected
    /// request is not counted.
    async fn hit(&self, key: &LimitKey, limit: u64, window: Duration) -> Result<u64>;

    /// Current count in the live window, or `None` if there is no window.
    async fn count(&self, key: &LimitKey) -> Result<Option<u64>>;

    /// Release the connection. Must be safe to call more than once.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
