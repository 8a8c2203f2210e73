// Proxy configuration, loaded from a YAML file

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use url::Url;

pub const REDACTED: &str = "***REDACTED***";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub proxy: ServerSettings,
    pub caching: CachingSettings,
    pub security: SecuritySettings,
    pub intelligence: IntelligenceSettings,
    pub user_agents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Default upstream timeout in seconds
    pub timeout: u64,
    /// Upper bound for a bulk request's concurrency limit
    pub max_concurrent: usize,
    pub show_requests: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachingSettings {
    pub enabled: bool,
    /// Seconds a cached response stays valid
    pub ttl: u64,
    pub backend: CacheBackend,
    pub redis_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Accepted bearer tokens. Empty disables authentication.
    pub api_keys: Vec<String>,
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
    pub rate_limiting: RateLimitSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub requests_per_minute: u64,
    pub requests_per_hour: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntelligenceSettings {
    pub enabled: bool,
    pub database_path: String,
    /// Records kept by housekeeping
    pub max_records: usize,
    /// Characters of the body stored with each record
    pub excerpt_length: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            timeout: 30,
            max_concurrent: 100,
            show_requests: true,
        }
    }
}

impl Default for CachingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: 3600,
            backend: CacheBackend::Memory,
            redis_url: "redis://localhost:6379/0".to_string(),
        }
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            rate_limiting: RateLimitSettings::default(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
            requests_per_hour: 1000,
        }
    }
}

impl Default for IntelligenceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            database_path: "intelligence/fetchgate.db".to_string(),
            max_records: 1000,
            excerpt_length: 500,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            proxy: ServerSettings::default(),
            caching: CachingSettings::default(),
            security: SecuritySettings::default(),
            intelligence: IntelligenceSettings::default(),
            user_agents: default_user_agents(),
        }
    }
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    ]
    .iter()
    .map(|ua| ua.to_string())
    .collect()
}

impl ProxyConfig {
    /// Load the config at `path`. A missing file yields the defaults, which are
    /// then written to `path` so the operator has something to edit.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            match config.save(path) {
                Ok(()) => info!("Wrote default configuration to {}", path.display()),
                Err(e) => warn!("{}", e),
            }
            return Ok(config);
        }

        Self::load_existing(path)
    }

    /// Load the config at `path`, failing if the file is missing. Used on
    /// reload, where falling back to defaults would drop keys and domain lists.
    pub fn load_existing(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config = Self::from_yaml(&content).map_err(|source| ConfigError::InvalidYaml {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document deserializes to unit, not to a map
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self).map_err(|source| ConfigError::InvalidYaml {
            path: path.display().to_string(),
            source,
        })?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.display().to_string(),
                source,
            })?;
        }

        fs::write(path, yaml).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "proxy.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.caching.backend == CacheBackend::Redis && self.caching.redis_url.is_empty() {
            return Err(ConfigError::Invalid(
                "caching.redis_url is required for the redis backend".to_string(),
            ));
        }
        let limits = &self.security.rate_limiting;
        if limits.enabled && (limits.requests_per_minute == 0 || limits.requests_per_hour == 0) {
            return Err(ConfigError::Invalid(
                "rate limits must be positive when rate limiting is enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Configuration as JSON with secrets replaced
    pub fn sanitized(&self) -> serde_json::Value {
        let mut copy = self.clone();
        copy.security.api_keys = copy
            .security
            .api_keys
            .iter()
            .map(|_| REDACTED.to_string())
            .collect();
        copy.caching.redis_url = redact_url_password(&copy.caching.redis_url);

        serde_json::to_value(copy).unwrap_or_default()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.proxy.host, self.proxy.port)
    }
}

fn redact_url_password(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some(REDACTED));
            parsed.to_string()
        }
        _ => raw.to_string(),
    }
}
