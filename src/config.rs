use envconfig::Envconfig;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::limiter::RateLimits;
use crate::store::Backend;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Durable counter store REST endpoint
    #[envconfig(from = "UPSTASH_REDIS_REST_URL")]
    pub store_url: Option<String>,

    /// Bearer token for the durable counter store
    #[envconfig(from = "UPSTASH_REDIS_REST_TOKEN")]
    pub store_token: Option<String>,

    /// Upper bound on one durable limiter evaluation, in milliseconds
    #[envconfig(from = "STORE_TIMEOUT_MS", default = "2000")]
    pub store_timeout_ms: u64,

    /// Interval between sweeps of expired in-memory records, in seconds
    #[envconfig(from = "CLEANUP_INTERVAL", default = "300")]
    pub cleanup_interval_secs: u64,

    #[envconfig(from = "LIMIT_PER_HOUR", default = "5")]
    pub limit_per_hour: u64,

    #[envconfig(from = "LIMIT_PER_DAY", default = "15")]
    pub limit_per_day: u64,

    #[envconfig(from = "LIMIT_GLOBAL_PER_DAY", default = "500")]
    pub limit_global_per_day: u64,

    /// Comma separated list of origins allowed to call the proxy
    #[envconfig(
        from = "ALLOWED_ORIGINS",
        default = "https://codingwithdodamani.github.io,https://promptvision-ai.vercel.app,http://localhost:3000,http://127.0.0.1:5500,http://localhost:5500"
    )]
    pub allowed_origins: String,

    /// Analysis service key; demo responses are served when unset
    #[envconfig(from = "GEMINI_API_KEY")]
    pub gemini_api_key: Option<String>,

    #[envconfig(
        from = "GEMINI_API_BASE",
        default = "https://generativelanguage.googleapis.com/v1beta"
    )]
    pub gemini_api_base: String,

    #[envconfig(from = "GEMINI_MODEL", default = "gemini-1.5-flash")]
    pub gemini_model: String,

    #[envconfig(from = "ANALYSIS_TIMEOUT_SECS", default = "60")]
    pub analysis_timeout_secs: u64,

    /// Largest request body accepted on the analyze route
    #[envconfig(from = "MAX_BODY_BYTES", default = "16777216")]
    pub max_body_bytes: usize,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::init_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an explicit variable map, falling back to
    /// defaults for anything missing.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let config = Config::init_from_hashmap(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limit_per_hour == 0 || self.limit_per_day == 0 || self.limit_global_per_day == 0 {
            return Err(ConfigError::Invalid(
                "rate limits must be greater than 0".to_string(),
            ));
        }

        if let Some(url) = non_empty(&self.store_url) {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Invalid(format!(
                    "UPSTASH_REDIS_REST_URL must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }

        if self.store_timeout_ms == 0 || self.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "STORE_TIMEOUT_MS and CLEANUP_INTERVAL must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve which counter backend the limiter should use.
    ///
    /// Both the endpoint and the token must be present for the durable store;
    /// a half-configured store falls back to the in-memory ledger.
    pub fn backend(&self) -> Backend {
        match (non_empty(&self.store_url), non_empty(&self.store_token)) {
            (Some(endpoint), Some(token)) => Backend::Durable {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                token: token.to_string(),
            },
            (Some(_), None) | (None, Some(_)) => {
                tracing::warn!(
                    "Durable store is only partially configured, using in-memory rate limiting"
                );
                Backend::InMemory
            }
            (None, None) => Backend::InMemory,
        }
    }

    pub fn limits(&self) -> RateLimits {
        RateLimits {
            per_hour: self.limit_per_hour,
            per_day: self.limit_per_day,
            global_per_day: self.limit_global_per_day,
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn origins(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn gemini_key(&self) -> Option<&str> {
        non_empty(&self.gemini_api_key)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
