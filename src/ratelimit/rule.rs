//! Rate limit rules and the stacked rules attached to one route.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::context::{IdentityExtractor, RejectionHandler};
use crate::error::{GatekeeperError, Result};

/// Time window unit for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
    /// Per-day rate limiting
    Day,
}

impl TimeWindow {
    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Second => Duration::from_secs(1),
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Hour => Duration::from_secs(3600),
            TimeWindow::Day => Duration::from_secs(86400),
        }
    }
}

/// An immutable fixed-window rule: at most `limit` requests per `window`.
///
/// Rules may override how the caller is identified and how a rejection is
/// reported; when they don't, the limiter-wide settings apply.
#[derive(Clone)]
pub struct RateLimitRule {
    limit: u64,
    window: Duration,
    identifier: Option<Arc<dyn IdentityExtractor>>,
    rejection: Option<Arc<dyn RejectionHandler>>,
}

impl RateLimitRule {
    /// Create a rule allowing `limit` requests per `window`.
    ///
    /// # Errors
    /// Returns a configuration error if `limit` is zero or `window` is shorter
    /// than one millisecond.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(GatekeeperError::Config(
                "rate limit must allow at least one request".to_string(),
            ));
        }
        if window.as_millis() == 0 {
            return Err(GatekeeperError::Config(
                "rate limit window must be at least one millisecond".to_string(),
            ));
        }
        Ok(Self {
            limit,
            window,
            identifier: None,
            rejection: None,
        })
    }

    /// Create a rule allowing `limit` requests per unit of time.
    pub fn per(limit: u64, unit: TimeWindow) -> Result<Self> {
        Self::new(limit, unit.duration())
    }

    /// Use a custom identity extractor for this rule only.
    pub fn with_identifier(mut self, identifier: impl IdentityExtractor + 'static) -> Self {
        self.identifier = Some(Arc::new(identifier));
        self
    }

    /// Use a custom rejection handler for this rule only.
    pub fn with_rejection(mut self, handler: impl RejectionHandler + 'static) -> Self {
        self.rejection = Some(Arc::new(handler));
        self
    }

    /// Maximum number of requests permitted in one window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Length of one counting window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Window length in whole milliseconds, as sent to the store.
    pub fn window_millis(&self) -> u64 {
        self.window.as_millis() as u64
    }

    pub(crate) fn identifier(&self) -> Option<&Arc<dyn IdentityExtractor>> {
        self.identifier.as_ref()
    }

    pub(crate) fn rejection(&self) -> Option<&Arc<dyn RejectionHandler>> {
        self.rejection.as_ref()
    }
}

impl fmt::Debug for RateLimitRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitRule")
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("custom_identifier", &self.identifier.is_some())
            .field("custom_rejection", &self.rejection.is_some())
            .finish()
    }
}

/// Serializable form of a rule, as written in configuration files.
///
/// The window is the sum of every duration field, so `seconds: 1` and
/// `milliseconds: 500` together describe a 1.5 second window. A `unit` may be
/// given instead of (or in addition to) the explicit fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Number of requests allowed per window
    pub counts: u64,
    #[serde(default)]
    pub milliseconds: u64,
    #[serde(default)]
    pub seconds: u64,
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub hours: u64,
    /// Optional named unit added to the window
    #[serde(default)]
    pub unit: Option<TimeWindow>,
}

impl RuleConfig {
    /// Total window length described by this config, or `None` if it does
    /// not fit in a `u64` count of milliseconds.
    pub fn window(&self) -> Option<Duration> {
        let millis = [
            (self.milliseconds, 1),
            (self.seconds, 1000),
            (self.minutes, 60_000),
            (self.hours, 3_600_000),
        ]
        .into_iter()
        .try_fold(0u64, |total, (value, scale)| {
            value.checked_mul(scale).and_then(|ms| total.checked_add(ms))
        })?;
        let unit = self.unit.map(|u| u.duration()).unwrap_or_default();
        Duration::from_millis(millis).checked_add(unit)
    }
}

impl TryFrom<&RuleConfig> for RateLimitRule {
    type Error = GatekeeperError;

    fn try_from(config: &RuleConfig) -> Result<Self> {
        let window = config.window().ok_or_else(|| {
            GatekeeperError::Config(format!(
                "rate limit window overflows: {:?}",
                config
            ))
        })?;
        RateLimitRule::new(config.counts, window)
    }
}

/// The ordered rules stacked on one endpoint.
///
/// Each rule counts in its own window: rule `i` gets the key suffix `i`, so a
/// short burst limit and a long sustained limit on the same route never share
/// a counter.
#[derive(Debug, Clone, Default)]
pub struct RouteLimits {
    rules: Vec<RateLimitRule>,
}

impl RouteLimits {
    /// Create an empty rule stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule; its index is its position in the stack.
    pub fn with_rule(mut self, rule: RateLimitRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Build a rule stack from configuration entries.
    pub fn from_configs(configs: &[RuleConfig]) -> Result<Self> {
        let rules = configs
            .iter()
            .map(RateLimitRule::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Iterate over `(index, rule)` pairs in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &RateLimitRule)> {
        self.rules.iter().enumerate()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromIterator<RateLimitRule> for RouteLimits {
    fn from_iter<I: IntoIterator<Item = RateLimitRule>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}
