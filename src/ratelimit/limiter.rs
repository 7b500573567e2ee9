//! Core rate limiter implementation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, trace};

use super::context::{
    ClientAndPath, IdentityExtractor, RejectionHandler, RequestContext, ResponseHeaders,
    TooManyRequests,
};
use super::key::LimitKey;
use super::rule::{RateLimitRule, RouteLimits};
use super::store::WindowStore;
use crate::error::{GatekeeperError, Result};

/// Default application name leading every key.
pub const DEFAULT_APP_NAME: &str = "gatekeeper";
/// Default prefix following the application name.
pub const DEFAULT_PREFIX: &str = "limiter";

/// Limiter-wide settings, fixed at construction.
#[derive(Clone)]
pub struct LimiterSettings {
    app_name: String,
    prefix: String,
    identifier: Arc<dyn IdentityExtractor>,
    rejection: Arc<dyn RejectionHandler>,
}

impl LimiterSettings {
    pub fn new(app_name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            prefix: prefix.into(),
            identifier: Arc::new(ClientAndPath),
            rejection: Arc::new(TooManyRequests),
        }
    }

    /// Identify callers with `identifier` unless a rule overrides it.
    pub fn with_identifier(mut self, identifier: impl IdentityExtractor + 'static) -> Self {
        self.identifier = Arc::new(identifier);
        self
    }

    /// Report rejections with `handler` unless a rule overrides it.
    pub fn with_rejection(mut self, handler: impl RejectionHandler + 'static) -> Self {
        self.rejection = Arc::new(handler);
        self
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self::new(DEFAULT_APP_NAME, DEFAULT_PREFIX)
    }
}

impl fmt::Debug for LimiterSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterSettings")
            .field("app_name", &self.app_name)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// The request fits in the current window
    Allowed,
    /// The window is full; retry once it resets
    Rejected { retry_after_ms: u64 },
}

impl Decision {
    fn from_wait(wait_ms: u64) -> Self {
        if wait_ms == 0 {
            Decision::Allowed
        } else {
            Decision::Rejected {
                retry_after_ms: wait_ms,
            }
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// `0` when allowed, else milliseconds until the window resets.
    pub fn wait_millis(&self) -> u64 {
        match self {
            Decision::Allowed => 0,
            Decision::Rejected { retry_after_ms } => *retry_after_ms,
        }
    }

    pub fn retry_after(&self) -> Duration {
        Duration::from_millis(self.wait_millis())
    }
}

/// Fixed-window rate limiter over a shared [`WindowStore`].
///
/// The limiter keeps no counts itself; every decision is made by the store,
/// so one limiter can be shared freely across tasks and any number of
/// processes pointing at the same store agree on the counts.
pub struct Limiter {
    settings: LimiterSettings,
    store: RwLock<Option<Arc<dyn WindowStore>>>,
}

impl Limiter {
    /// Create a limiter. It rejects every check until [`Limiter::init`] runs.
    pub fn new(settings: LimiterSettings) -> Self {
        Self {
            settings,
            store: RwLock::new(None),
        }
    }

    /// Attach the shared store and prepare it for counting.
    ///
    /// # Errors
    /// Fails if the store cannot be reached or refuses the counting script.
    pub async fn init(&self, store: Arc<dyn WindowStore>) -> Result<()> {
        store.prepare().await?;
        *self.store.write() = Some(store);
        info!(
            app_name = %self.settings.app_name,
            prefix = %self.settings.prefix,
            "Rate limiter initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.store.read().is_some()
    }

    pub fn settings(&self) -> &LimiterSettings {
        &self.settings
    }

    fn store(&self) -> Result<Arc<dyn WindowStore>> {
        self.store
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(GatekeeperError::NotInitialized)
    }

    /// Key the request is counted under for the rule at `index`.
    pub fn key_for(&self, rule: &RateLimitRule, index: usize, ctx: &RequestContext) -> LimitKey {
        let identity = match rule.identifier() {
            Some(identifier) => identifier.identify(ctx),
            None => self.settings.identifier.identify(ctx),
        };
        LimitKey::new(
            &self.settings.app_name,
            &self.settings.prefix,
            &identity,
            index,
        )
    }

    /// Count the request against `rule` and report whether it may proceed.
    ///
    /// A rejection is an ordinary [`Decision`], not an error. Store failures
    /// are returned as errors without retry, and nothing is admitted on
    /// failure.
    ///
    /// Dropping the returned future after the store applied the hit still
    /// consumes a slot in the window.
    pub async fn check(
        &self,
        rule: &RateLimitRule,
        index: usize,
        ctx: &RequestContext,
    ) -> Result<Decision> {
        let store = self.store()?;
        let key = self.key_for(rule, index, ctx);

        trace!(
            key = %key,
            limit = rule.limit(),
            window_ms = rule.window_millis(),
            "Checking rate limit"
        );

        let wait = store.hit(&key, rule.limit(), rule.window()).await?;
        let decision = Decision::from_wait(wait);

        if !decision.is_allowed() {
            debug!(key = %key, wait_ms = wait, "Rate limit exceeded");
        }

        Ok(decision)
    }

    /// Check the request and hand rejections to the rejection handler.
    ///
    /// The rule's handler wins over the limiter's; with neither customized,
    /// a rejection sets `Retry-After` on `response` and returns
    /// [`GatekeeperError::RateLimited`].
    pub async fn enforce(
        &self,
        rule: &RateLimitRule,
        index: usize,
        ctx: &RequestContext,
        response: &mut ResponseHeaders,
    ) -> Result<()> {
        match self.check(rule, index, ctx).await? {
            Decision::Allowed => Ok(()),
            rejected => {
                let handler = rule.rejection().unwrap_or(&self.settings.rejection);
                handler.reject(ctx, response, rejected.retry_after())
            }
        }
    }

    /// Current count of the window `rule` would use for this request.
    pub async fn count(
        &self,
        rule: &RateLimitRule,
        index: usize,
        ctx: &RequestContext,
    ) -> Result<Option<u64>> {
        let store = self.store()?;
        store.count(&self.key_for(rule, index, ctx)).await
    }

    /// Release the store. Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let store = self.store.write().take();
        if let Some(store) = store {
            store.close().await?;
            info!("Rate limiter closed");
        }
        Ok(())
    }
}

impl fmt::Debug for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("settings", &self.settings)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl RouteLimits {
    /// Enforce every stacked rule in order; the first rejection stops the
    /// evaluation. Rules checked before it have already counted the request.
    pub async fn enforce(
        &self,
        limiter: &Limiter,
        ctx: &RequestContext,
        response: &mut ResponseHeaders,
    ) -> Result<()> {
        for (index, rule) in self.iter() {
            limiter.enforce(rule, index, ctx, response).await?;
        }
        Ok(())
    }
}
