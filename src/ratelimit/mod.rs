//! Fixed-window rate limiting over a shared store.

mod clock;
mod context;
mod key;
mod limiter;
mod memory;
mod redis_store;
mod rule;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{
    retry_after_secs, ClientAndPath, IdentityExtractor, RejectionHandler, RequestContext,
    ResponseHeaders, TooManyRequests,
};
pub use key::LimitKey;
pub use limiter::{Decision, Limiter, LimiterSettings, DEFAULT_APP_NAME, DEFAULT_PREFIX};
pub use memory::{MemoryWindowStore, DEFAULT_PURGE_INTERVAL};
pub use redis_store::{RedisWindowStore, FIXED_WINDOW_SCRIPT};
pub use rule::{RateLimitRule, RouteLimits, RuleConfig, TimeWindow};
pub use store::WindowStore;
