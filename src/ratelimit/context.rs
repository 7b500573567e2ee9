//! Request context handed to the limiter by the embedding framework, plus the
//! hooks that turn it into an identity and turn a rejection into an error.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::warn;

use crate::error::{GatekeeperError, RateLimitRejection, Result};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// The parts of an incoming request the limiter needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    client_host: String,
    path: String,
    /// Header names are stored lower-cased.
    headers: BTreeMap<String, String>,
}

impl RequestContext {
    /// Create a context for a request from `client_host` to `path`.
    pub fn new(client_host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            client_host: client_host.into(),
            path: path.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Attach a request header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Network address of the peer that sent the request.
    pub fn client_host(&self) -> &str {
        &self.client_host
    }

    /// Normalized route path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Look up a header by name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The originating client: first `X-Forwarded-For` hop, else the peer.
    pub fn client_ip(&self) -> &str {
        self.header(FORWARDED_FOR)
            .and_then(|forwarded| forwarded.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .unwrap_or(&self.client_host)
    }
}

/// Minimal response object a rejection handler may decorate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    headers: BTreeMap<String, String>,
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Derives the identity a request is counted under.
pub trait IdentityExtractor: Send + Sync {
    fn identify(&self, ctx: &RequestContext) -> String;
}

impl<F> IdentityExtractor for F
where
    F: Fn(&RequestContext) -> String + Send + Sync,
{
    fn identify(&self, ctx: &RequestContext) -> String {
        self(ctx)
    }
}

/// Default identity: originating client IP and route path.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientAndPath;

impl IdentityExtractor for ClientAndPath {
    fn identify(&self, ctx: &RequestContext) -> String {
        format!("{}:{}", ctx.client_ip(), ctx.path())
    }
}

/// Decides what a rejected request turns into.
///
/// Returning `Ok(())` lets the request through despite the rejection.
pub trait RejectionHandler: Send + Sync {
    fn reject(
        &self,
        ctx: &RequestContext,
        response: &mut ResponseHeaders,
        wait: Duration,
    ) -> Result<()>;
}

impl<F> RejectionHandler for F
where
    F: Fn(&RequestContext, &mut ResponseHeaders, Duration) -> Result<()> + Send + Sync,
{
    fn reject(
        &self,
        ctx: &RequestContext,
        response: &mut ResponseHeaders,
        wait: Duration,
    ) -> Result<()> {
        self(ctx, response, wait)
    }
}

/// Default rejection: `Retry-After` header plus a 429 error.
#[derive(Debug, Clone, Copy, Default)]
pub struct TooManyRequests;

impl RejectionHandler for TooManyRequests {
    fn reject(
        &self,
        ctx: &RequestContext,
        response: &mut ResponseHeaders,
        wait: Duration,
    ) -> Result<()> {
        let secs = retry_after_secs(wait);
        warn!(
            client = %ctx.client_ip(),
            path = %ctx.path(),
            retry_after_secs = secs,
            "Request rejected by rate limiter"
        );
        response.insert("Retry-After", secs.to_string());
        Err(GatekeeperError::RateLimited(RateLimitRejection::new(secs)))
    }
}

/// Whole seconds to advertise for a wait, rounded up.
pub fn retry_after_secs(wait: Duration) -> u64 {
    (wait.as_millis() as u64).div_ceil(1000)
}
