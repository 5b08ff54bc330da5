//! Environment-driven configuration.
//!
//! Every setting has a default so the proxy starts with an empty
//! environment; each fallback is logged. A set-but-unparsable variable is an
//! error rather than a silent default.

use std::{env, fmt::Display, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{info, warn};

use crate::proxy::{DEFAULT_NAMESPACE, DEFAULT_TTL, ProxyOptions};

/// Longest accepted `CACHE_TTL_SECS`: 30 days.
pub const MAX_CACHE_TTL_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Which [`CacheStore`](crate::cache::CacheStore) the binary should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
    None,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            "none" | "off" => Ok(Self::None),
            other => Err(format!("expected redis, memory or none, got {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub upstream_base_url: String,
    pub upstream_timeout: Duration,
    pub cache_backend: CacheBackend,
    pub redis_url: Option<String>,
    pub cache_ttl: Duration,
    pub cache_namespace: String,
    pub production: bool,
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 5001,
            upstream_base_url: "https://api.mangadex.org".to_owned(),
            upstream_timeout: Duration::from_millis(10_000),
            cache_backend: CacheBackend::Redis,
            redis_url: None,
            cache_ttl: DEFAULT_TTL,
            cache_namespace: DEFAULT_NAMESPACE.to_owned(),
            production: false,
            cors_origins: vec!["http://localhost:3000".to_owned()],
        }
    }
}

impl Config {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, which maps a variable name
    /// to its value. Lets tests supply an environment without touching the
    /// real one.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let upstream_timeout_ms: u64 = try_load(&lookup, "UPSTREAM_TIMEOUT_MS", 10_000)?;
        let cache_ttl_secs: u64 = try_load(&lookup, "CACHE_TTL_SECS", DEFAULT_TTL.as_secs())?;
        if !(1..=MAX_CACHE_TTL_SECS).contains(&cache_ttl_secs) {
            return Err(ConfigError::Invalid {
                key: "CACHE_TTL_SECS",
                value: cache_ttl_secs.to_string(),
                reason: format!("must be between 1 and {MAX_CACHE_TTL_SECS}"),
            });
        }
        let app_env: String = try_load(&lookup, "APP_ENV", "development".to_owned())?;

        let cors_origins = match lookup("CORS_ORIGINS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_owned)
                .collect(),
            None => defaults.cors_origins,
        };

        Ok(Self {
            host: try_load(&lookup, "HOST", defaults.host)?,
            port: try_load(&lookup, "PORT", defaults.port)?,
            upstream_base_url: try_load(&lookup, "UPSTREAM_BASE_URL", defaults.upstream_base_url)?,
            upstream_timeout: Duration::from_millis(upstream_timeout_ms),
            cache_backend: try_load(&lookup, "CACHE_BACKEND", defaults.cache_backend)?,
            redis_url: lookup("REDIS_URL").filter(|url| !url.is_empty()),
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            cache_namespace: try_load(&lookup, "CACHE_NAMESPACE", defaults.cache_namespace)?,
            production: app_env.eq_ignore_ascii_case("production"),
            cors_origins,
        })
    }

    /// `host:port` for [`Server::bind`](crate::Server::bind).
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn proxy_options(&self) -> ProxyOptions {
        ProxyOptions {
            namespace: self.cache_namespace.clone(),
            ttl: self.cache_ttl,
            expose_error_details: !self.production,
        }
    }
}

fn try_load<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Debug,
    T::Err: Display,
{
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|e: T::Err| {
            warn!(key, %value, "invalid configuration value");
            ConfigError::Invalid {
                key,
                value,
                reason: e.to_string(),
            }
        }),
        None => {
            info!(key, ?default, "not set, using default");
            Ok(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_with_empty_environment() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:5001");
        assert_eq!(config.upstream_base_url, "https://api.mangadex.org");
        assert_eq!(config.upstream_timeout, Duration::from_secs(10));
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.cache_backend, CacheBackend::Redis);
        assert_eq!(config.redis_url, None);
        assert!(!config.production);
        assert!(config.proxy_options().expose_error_details);
        assert_eq!(config.proxy_options().namespace, "mangadex");
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("PORT", "8080"),
            ("CACHE_TTL_SECS", "60"),
            ("CACHE_BACKEND", "Memory"),
            ("APP_ENV", "production"),
            ("CORS_ORIGINS", "https://a.example, https://b.example,"),
            ("REDIS_URL", "redis://cache:6379"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.cache_backend, CacheBackend::Memory);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert!(!config.proxy_options().expose_error_details);
        assert_eq!(
            config.cors_origins,
            vec!["https://a.example".to_owned(), "https://b.example".to_owned()]
        );
    }

    #[test]
    fn unparsable_value_is_an_error() {
        let err = load(&[("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));

        let err = load(&[("CACHE_BACKEND", "memcached")]).unwrap_err();
        assert!(err.to_string().contains("CACHE_BACKEND"));
    }

    #[test]
    fn cache_ttl_must_be_in_range() {
        for ttl in ["0", "2592001", "18446744073709551615"] {
            let err = load(&[("CACHE_TTL_SECS", ttl)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { key: "CACHE_TTL_SECS", .. }),
                "ttl {ttl}"
            );
        }
        let config = load(&[("CACHE_TTL_SECS", "2592000")]).unwrap();
        assert_eq!(config.cache_ttl, Duration::from_secs(MAX_CACHE_TTL_SECS));
    }
}
