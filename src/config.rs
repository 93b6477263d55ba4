//! Configuration loaded from `~/.config/streamr/config.toml` plus environment overrides.
//!
//! Every section has defaults, so a missing file is not an error. Proxy
//! settings are validated eagerly by [`Config::validate`] so that a bad
//! rule stops the process before any request is served.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::context::CountryCode;
use crate::dispatcher::ProxyConfig;
use crate::error::{Error, Result};

pub const DEFAULT_HEALTH_URL: &str = "https://api.ipify.org";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub proxy: ProxySettings,
    pub http: HttpSettings,
    pub retry: RetrySettings,
    pub cache: CacheSettings,
    pub resolver: ResolverSettings,
    pub health: HealthSettings,
    pub sources: Vec<SourceConfig>,
    pub plugins: Vec<PluginConfig>,
}

/// Egress proxy settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Single proxy used for every destination (`ALL_PROXY`).
    pub all: Option<String>,
    /// Ordered `hostGlob:proxyURL` rules (`PROXY_CONFIG`). Takes precedence over `all`.
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub pool_idle_timeout_secs: u64,
    /// Responses larger than this are rejected.
    pub max_body_bytes: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            pool_idle_timeout_secs: 90,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

impl HttpSettings {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt, idempotent requests only.
    pub max_retries: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    /// Maximum number of cached responses.
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 15 * 60,
            capacity: 1024,
        }
    }
}

impl CacheSettings {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    pub max_concurrent_extractions: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_concurrent_extractions: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// IP-echo service used by the egress self-check.
    pub url: String,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_HEALTH_URL.to_string(),
        }
    }
}

/// A source that builds embed-page URLs from templates.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub label: Option<String>,
    #[serde(default)]
    pub countries: Vec<CountryCode>,
    /// Template for movies, e.g. `https://host/embed/movie/{id}`.
    pub movie: Option<String>,
    /// Template for episodes, may use `{season}` and `{episode}`.
    pub series: Option<String>,
}

/// An external binary acting as an extractor.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    pub name: String,
    pub binary: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// URL regex patterns this plugin handles.
    pub patterns: Vec<String>,
    #[serde(default = "default_plugin_timeout")]
    pub timeout_secs: u64,
}

fn default_plugin_timeout() -> u64 {
    30
}

impl Config {
    /// Loads `path`, or the default config path when `None`, then applies
    /// environment overrides.
    ///
    /// A missing file at the default location yields the defaults; an
    /// explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = config_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_with(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config_with(format!("failed to read {}", path.display()), e))?;
        Self::from_toml(&content)
            .map_err(|e| Error::config_with(format!("invalid TOML in {}", path.display()), e))
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Applies overrides from an environment lookup.
    ///
    /// `PROXY_CONFIG` replaces the rule list; `ALL_PROXY` (or `all_proxy`)
    /// replaces the global proxy.
    pub fn apply_env_with<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        if let Some(rules) = non_empty("PROXY_CONFIG") {
            self.proxy.rules = rules.split(',').map(|r| r.trim().to_string()).collect();
        }
        if let Some(all) = non_empty("ALL_PROXY").or_else(|| non_empty("all_proxy")) {
            self.proxy.all = Some(all);
        }
        if let Some(ttl) = non_empty("STREAMR_CACHE_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.cache.ttl_secs = ttl;
        }
        if let Some(url) = non_empty("STREAMR_HEALTH_URL") {
            self.health.url = url;
        }
    }

    /// Parses the proxy rule set, failing on any malformed entry.
    pub fn proxy_config(&self) -> Result<ProxyConfig> {
        ProxyConfig::from_settings(&self.proxy)
    }

    /// Startup validation of everything that must not fail per request.
    pub fn validate(&self) -> Result<()> {
        self.proxy_config()?;
        url::Url::parse(&self.health.url)
            .map_err(|e| Error::config_with(format!("health URL '{}' is invalid", self.health.url), e))?;
        if self.resolver.max_concurrent_extractions == 0 {
            return Err(Error::config("resolver.max_concurrent_extractions must be at least 1"));
        }
        for source in &self.sources {
            if source.movie.is_none() && source.series.is_none() {
                return Err(Error::config(format!(
                    "source '{}' needs a movie or series template",
                    source.id
                )));
            }
        }
        Ok(())
    }
}

/// Return the path to the config file.
#[must_use]
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("streamr")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parse_empty_config() {
        let config = Config::from_toml("").unwrap();
        assert!(config.proxy.all.is_none());
        assert!(config.proxy.rules.is_empty());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.health.url, DEFAULT_HEALTH_URL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[proxy]
rules = ["*.example.com:http://proxy-a:8080", "*:socks5://proxy-b:1080"]

[cache]
ttl_secs = 60

[[sources]]
id = "vidsrc"
countries = ["en", "multi"]
movie = "https://vidsrc.example/embed/movie/{id}"
series = "https://vidsrc.example/embed/tv/{id}/{season}-{episode}"

[[plugins]]
name = "my-hoster"
binary = "/usr/local/bin/streamr-my-hoster"
patterns = ["my-hoster\\.example/.*"]
"#;
        let config = Config::from_toml(toml_str).unwrap();
        assert_eq!(config.proxy.rules.len(), 2);
        assert_eq!(config.cache.ttl(), Duration::from_secs(60));
        assert_eq!(config.sources[0].countries, vec![CountryCode::En, CountryCode::Multi]);
        assert_eq!(config.plugins[0].timeout_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_proxy_settings() {
        let mut config = Config::default();
        config.apply_env_with(env(&[
            ("PROXY_CONFIG", "a.example:http://p1:8080, *:socks5://p2:1080"),
            ("all_proxy", "http://global:3128"),
            ("STREAMR_CACHE_TTL_SECS", "5"),
        ]));
        assert_eq!(
            config.proxy.rules,
            vec!["a.example:http://p1:8080", "*:socks5://p2:1080"]
        );
        assert_eq!(config.proxy.all.as_deref(), Some("http://global:3128"));
        assert_eq!(config.cache.ttl_secs, 5);
    }

    #[test]
    fn invalid_proxy_rule_fails_validation() {
        let mut config = Config::default();
        config.apply_env_with(env(&[("PROXY_CONFIG", "missing-proxy-half")]));
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn source_without_template_fails_validation() {
        let config = Config::from_toml("[[sources]]\nid = \"empty\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(Some(&dir.path().join("absent.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[resolver]\nmax_concurrent_extractions = 4\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.resolver.max_concurrent_extractions, 4);
    }
}
