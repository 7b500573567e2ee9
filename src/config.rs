//! Configuration management for Gatekeeper.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{LimiterSettings, RouteLimits, RuleConfig, DEFAULT_APP_NAME, DEFAULT_PREFIX};
use crate::wordfilter::{SensitiveWordFilter, DEFAULT_REPLACEMENT};

/// Prefix of environment variables overriding file settings,
/// e.g. `GATEKEEPER__LIMITER__REDIS_URL`.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for Gatekeeper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Rate limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Sensitive-word filter configuration
    #[serde(default)]
    pub filter: FilterConfig,

    /// Rate limits stacked on each route
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Application name leading every key
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Key prefix following the application name
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            app_name: default_app_name(),
            prefix: default_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1/".to_string()
}

fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

impl LimiterConfig {
    /// Limiter settings with the default identity and rejection hooks.
    pub fn settings(&self) -> LimiterSettings {
        LimiterSettings::new(&self.app_name, &self.prefix)
    }
}

/// Sensitive-word filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Keyword files, one keyword per line
    #[serde(default)]
    pub keyword_paths: Vec<PathBuf>,

    /// Text written once per redacted character
    #[serde(default = "default_replacement")]
    pub replacement: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            keyword_paths: Vec::new(),
            replacement: default_replacement(),
        }
    }
}

fn default_replacement() -> String {
    DEFAULT_REPLACEMENT.to_string()
}

impl FilterConfig {
    /// Build a filter from every configured keyword file.
    pub fn build_filter(&self) -> Result<SensitiveWordFilter> {
        let mut filter = SensitiveWordFilter::new();
        filter.load_from_sources(&self.keyword_paths)?;
        Ok(filter)
    }
}

/// Rules stacked on one route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Route path the rules apply to
    pub path: String,

    /// Rules in evaluation order
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl GatekeeperConfig {
    /// Load configuration from a file, with `GATEKEEPER__*` environment
    /// variables taking precedence over file values.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_file_with_env_prefix(path.as_ref(), ENV_PREFIX)
    }

    fn from_file_with_env_prefix(path: &Path, env_prefix: &str) -> Result<Self> {
        info!(path = %path.display(), env_prefix = %env_prefix, "Loading configuration");

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix(env_prefix).separator("__"))
            .build()
            .map_err(|e| GatekeeperError::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Build the rule stack of every configured route, keyed by path.
    pub fn route_limits(&self) -> Result<HashMap<String, RouteLimits>> {
        self.routes
            .iter()
            .map(|route| -> Result<(String, RouteLimits)> {
                Ok((route.path.clone(), RouteLimits::from_configs(&route.rules)?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GatekeeperConfig::default();
        assert_eq!(config.limiter.redis_url, "redis://127.0.0.1/");
        assert_eq!(config.limiter.app_name, "gatekeeper");
        assert_eq!(config.limiter.prefix, "limiter");
        assert_eq!(config.filter.replacement, "*");
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r##"
limiter:
  redis_url: redis://cache:6379/2
  app_name: Shop
filter:
  keyword_paths: [/etc/gatekeeper/keywords.txt]
  replacement: "#"
routes:
  - path: /
    rules:
      - counts: 2
        seconds: 5
  - path: /multiple
    rules:
      - counts: 5
        seconds: 5
      - counts: 6
        seconds: 15
"##;
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiter.redis_url, "redis://cache:6379/2");
        assert_eq!(config.limiter.prefix, "limiter");
        assert_eq!(config.filter.replacement, "#");
        assert_eq!(config.filter.keyword_paths.len(), 1);

        let routes = config.route_limits().unwrap();
        assert_eq!(routes["/"].len(), 1);
        assert_eq!(routes["/multiple"].len(), 2);

        let settings = config.limiter.settings();
        assert_eq!(settings.app_name(), "Shop");
    }

    #[test]
    fn test_invalid_rule_is_config_error() {
        let yaml = r#"
routes:
  - path: /
    rules:
      - counts: 0
        seconds: 1
"#;
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();
        assert!(matches!(config.route_limits(), Err(GatekeeperError::Config(_))));
    }

    #[test]
    fn test_malformed_yaml() {
        let result = GatekeeperConfig::from_yaml("limiter: [not, a, map]");
        assert!(matches!(result, Err(GatekeeperError::Config(_))));
    }

    #[test]
    fn test_from_file_with_env_override() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "limiter:\n  app_name: fromfile\n  prefix: fileprefix").unwrap();

        // Prefix used by this test alone, so parallel tests never see the variable.
        let prefix = "GATEKEEPER_ENV_OVERRIDE_TEST";
        std::env::set_var("GATEKEEPER_ENV_OVERRIDE_TEST__LIMITER__PREFIX", "envprefix");
        let config = GatekeeperConfig::from_file_with_env_prefix(file.path(), prefix);
        std::env::remove_var("GATEKEEPER_ENV_OVERRIDE_TEST__LIMITER__PREFIX");

        let config = config.unwrap();
        assert_eq!(config.limiter.app_name, "fromfile");
        assert_eq!(config.limiter.prefix, "envprefix");
        assert_eq!(config.limiter.redis_url, "redis://127.0.0.1/");
    }

    #[test]
    fn test_from_file_without_overrides() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "routes:\n  - path: /\n    rules:\n      - counts: 2\n        seconds: 5").unwrap();

        let config =
            GatekeeperConfig::from_file_with_env_prefix(file.path(), "GATEKEEPER_NO_OVERRIDE_TEST")
                .unwrap();
        assert_eq!(config.limiter.prefix, "limiter");
        assert_eq!(config.route_limits().unwrap()["/"].len(), 1);
    }

    #[test]
    fn test_build_filter_from_keyword_files() {
        let mut keywords = tempfile::NamedTempFile::new().unwrap();
        writeln!(keywords, "forbidden").unwrap();

        let config = FilterConfig {
            keyword_paths: vec![keywords.path().to_path_buf()],
            ..Default::default()
        };
        let filter = config.build_filter().unwrap();
        assert_eq!(filter.filter("a forbidden word"), "a ********* word");
    }
}
