use crate::errors::{AppError, Result};
use crate::limiter::CountMode;
use crate::registry::LimitPolicy;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub rate_limit: RateLimitConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: usize,
    pub connection_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub default_max_requests: u64,
    pub default_window_seconds: u64,
    /// Upper bound on a single store round trip; on expiry the check fails open.
    pub store_timeout_ms: u64,
    #[serde(default)]
    pub count_mode: CountMode,
    /// Per-endpoint limits keyed by logical endpoint name, e.g. "POST:/v1/check".
    #[serde(default)]
    pub endpoints: HashMap<String, LimitPolicy>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        // Determine environment
        let environment = env::var("LIMITD_ENV").unwrap_or_else(|_| "development".to_string());

        // Build configuration
        let config = config::Config::builder()
            // Start with default config
            .add_source(config::File::with_name("config/default"))
            // Add environment-specific config
            .add_source(
                config::File::with_name(&format!("config/{}", environment)).required(false),
            )
            // Add environment variables with prefix LIMITD
            // e.g., LIMITD__SERVER__PORT=8080
            .add_source(
                config::Environment::with_prefix("LIMITD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Configuration(e.to_string()))?;

        // Deserialize into our Config struct
        config
            .try_deserialize()
            .map_err(|e| AppError::Configuration(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(AppError::Configuration("Invalid port number".to_string()));
        }

        if self.redis.url.is_empty() {
            return Err(AppError::Configuration(
                "Redis URL is required".to_string(),
            ));
        }

        if self.rate_limit.store_timeout_ms == 0 {
            return Err(AppError::Configuration(
                "Store timeout must be greater than zero".to_string(),
            ));
        }

        let default_policy = LimitPolicy::new(
            self.rate_limit.default_max_requests,
            self.rate_limit.default_window_seconds,
        );
        if !default_policy.is_valid() {
            return Err(AppError::Configuration(
                "Default rate limit policy must have positive max_requests and window_seconds"
                    .to_string(),
            ));
        }

        Ok(())
    }
}
