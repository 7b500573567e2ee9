//! Error types for Gatekeeper.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Detail message carried by the default rate-limit rejection.
pub const DEFAULT_REJECTION_DETAIL: &str =
    "The interview is too fast, please have a cup of tea and take a break!";

/// Main error type for Gatekeeper operations.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The limiter was used before `init` or after `close`
    #[error("Limiter is not initialized; call Limiter::init before checking requests")]
    NotInitialized,

    /// Shared store errors
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    /// A request exceeded its rate limit
    #[error("Rate limit exceeded: {0}")]
    RateLimited(RateLimitRejection),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;

/// A "429 Too Many Requests" signal for the embedding framework to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRejection {
    /// Application-level error code
    pub code: u16,
    /// HTTP status the embedding framework should answer with
    pub status_code: u16,
    /// Human readable explanation
    pub detail: String,
    /// Headers to attach to the response (always includes `Retry-After`)
    pub headers: BTreeMap<String, String>,
}

impl RateLimitRejection {
    /// Build a rejection telling the caller to retry after `retry_after_secs`.
    pub fn new(retry_after_secs: u64) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Retry-After".to_string(), retry_after_secs.to_string());
        Self {
            code: 429,
            status_code: 429,
            detail: DEFAULT_REJECTION_DETAIL.to_string(),
            headers,
        }
    }

    /// Seconds the caller should wait, as advertised in `Retry-After`.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.headers.get("Retry-After").and_then(|v| v.parse().ok())
    }
}

impl fmt::Display for RateLimitRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.retry_after_secs() {
            Some(secs) => write!(f, "{} (retry after {}s)", self.detail, secs),
            None => write!(f, "{}", self.detail),
        }
    }
}
