//! Limit key generation.

use std::fmt;

/// A key that uniquely identifies one counting window in the shared store.
///
/// The key is composed of the application name, the limiter prefix, the
/// caller identity and the index of the rule on its route, joined by `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimitKey(String);

impl LimitKey {
    /// Create a new limit key.
    pub fn new(app_name: &str, prefix: &str, identity: &str, index: usize) -> Self {
        Self(format!(
            "{}:{}:{}:{}",
            app_name.to_lowercase(),
            prefix,
            identity,
            index
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LimitKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
