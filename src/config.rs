//! Application configuration loaded from environment variables.
//!
//! All configuration is loaded from environment variables (optionally via a
//! `.env` file) with defaults suitable for development.
//!
//! # Rate Limiting
//!
//! - `LIMITER_ENABLED`: `true`/`false` (default: true)
//! - `LIMITER_RPS`: Tokens refilled per second per client (default: 2)
//! - `LIMITER_BURST`: Bucket capacity per client (default: 4)
//! - `LIMITER_IDLE_SECS` / `LIMITER_SWEEP_SECS`: Bucket retention and sweep period (default: 180 / 60)
//!
//! # Security
//!
//! - `CORS_TRUSTED_ORIGINS`: Exact origins allowed cross-origin access, comma or space separated
//! - `TRUSTED_PROXIES`: CIDR ranges whose `X-Forwarded-For` header is honoured
//! - `AUTH_FAILURE_LIMIT` / `AUTH_FAILURE_BURST`: Failed authentications tolerated per client per minute
//!   before 429 replaces 401 (default: 0, disabled / 5)

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::middleware::RateLimitSettings;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, for terminals
    #[default]
    Pretty,
    /// One JSON object per line, for log shippers
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected pretty or json)")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => f.write_str("pretty"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 4000)
    pub port: u16,

    /// Deployment environment name, reported by the healthcheck (default: "development")
    pub environment: String,

    /// Maximum request body size in bytes (default: 1MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    pub limiter_enabled: bool,

    /// Tokens refilled per second for each client
    pub limiter_rps: f64,

    /// Bucket capacity for each client
    pub limiter_burst: u32,

    /// Clients unseen for longer than this lose their bucket
    pub limiter_idle_timeout: Duration,

    /// How often idle buckets are swept
    pub limiter_sweep_interval: Duration,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Origins allowed cross-origin access, matched exactly
    /// Example: `https://app.example.com https://admin.example.com`
    pub cors_trusted_origins: Vec<String>,

    /// Trusted proxy CIDR ranges.
    ///
    /// `X-Forwarded-For` is only honoured when the connected peer is inside
    /// one of these networks. Empty means it is never honoured.
    ///
    /// Common values:
    /// - Private networks: "10.0.0.0/8,172.16.0.0/12,192.168.0.0/16"
    /// - Localhost: "127.0.0.0/8,::1/128"
    pub trusted_proxies: Vec<String>,

    /// Failed authentications allowed per client per minute (default: 0, no throttling)
    pub auth_failure_limit: u32,

    /// Failed authentications tolerated in a burst
    pub auth_failure_burst: u32,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log filter directive (e.g., "info", "greenlight=debug")
    pub log_level: String,

    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if a value cannot be parsed or the
    /// resulting configuration is invalid.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or(defaults.host),
            port: Self::parse_env("PORT", defaults.port)?,
            environment: env::var("ENV").unwrap_or(defaults.environment),
            max_request_body_size: Self::parse_env(
                "MAX_REQUEST_BODY_SIZE",
                defaults.max_request_body_size,
            )?,

            // Rate limiting
            limiter_enabled: Self::parse_env("LIMITER_ENABLED", defaults.limiter_enabled)?,
            limiter_rps: Self::parse_env("LIMITER_RPS", defaults.limiter_rps)?,
            limiter_burst: Self::parse_env("LIMITER_BURST", defaults.limiter_burst)?,
            limiter_idle_timeout: Duration::from_secs(Self::parse_env(
                "LIMITER_IDLE_SECS",
                defaults.limiter_idle_timeout.as_secs(),
            )?),
            limiter_sweep_interval: Duration::from_secs(Self::parse_env(
                "LIMITER_SWEEP_SECS",
                defaults.limiter_sweep_interval.as_secs(),
            )?),

            // Security
            cors_trusted_origins: Self::parse_list("CORS_TRUSTED_ORIGINS"),
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES"),
            auth_failure_limit: Self::parse_env("AUTH_FAILURE_LIMIT", defaults.auth_failure_limit)?,
            auth_failure_burst: Self::parse_env("AUTH_FAILURE_BURST", defaults.auth_failure_burst)?,

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: Self::parse_env("LOG_FORMAT", defaults.log_format)?,
            metrics_port: Self::parse_env("METRICS_PORT", defaults.metrics_port)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        self.rate_limit_settings()
            .validate()
            .map_err(|e| AppError::ConfigError(format!("Invalid limiter settings: {e}")))?;

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn rate_limit_settings(&self) -> RateLimitSettings {
        RateLimitSettings {
            enabled: self.limiter_enabled,
            rps: self.limiter_rps,
            burst: self.limiter_burst,
            idle_timeout: self.limiter_idle_timeout,
            sweep_interval: self.limiter_sweep_interval,
        }
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Metrics listener address, `None` when disabled.
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Read a comma or whitespace separated list. Missing means empty.
    fn parse_list(name: &str) -> Vec<String> {
        env::var(name).map(|raw| split_list(&raw)).unwrap_or_default()
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        let limiter = RateLimitSettings::default();
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 4000,
            environment: "development".to_string(),
            max_request_body_size: 1024 * 1024, // 1MB
            // Rate limiting
            limiter_enabled: limiter.enabled,
            limiter_rps: limiter.rps,
            limiter_burst: limiter.burst,
            limiter_idle_timeout: limiter.idle_timeout,
            limiter_sweep_interval: limiter.sweep_interval,
            // Security
            cors_trusted_origins: Vec::new(),
            trusted_proxies: Vec::new(),
            auth_failure_limit: 0,
            auth_failure_burst: 5,
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.port, 4000);
        assert_eq!(config.environment, "development");
        assert!(config.limiter_enabled);
        assert_eq!(config.limiter_rps, 2.0);
        assert_eq!(config.limiter_burst, 4);
        assert_eq!(config.limiter_idle_timeout, Duration::from_secs(180));
        assert!(config.cors_trusted_origins.is_empty());
        assert_eq!(config.auth_failure_limit, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_validate_rejects_zero_rps_when_enabled() {
        let config = Config {
            limiter_rps: 0.0,
            ..Config::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("RPS"));
    }

    #[test]
    fn test_validate_ignores_limiter_when_disabled() {
        let config = Config {
            limiter_enabled: false,
            limiter_rps: 0.0,
            limiter_burst: 0,
            ..Config::default()
        };

        assert!(config.validate().is_ok());
        assert!(!config.rate_limit_settings().enabled);
    }

    #[test]
    fn test_validate_body_size_zero() {
        let config = Config {
            max_request_body_size: 0,
            ..Config::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("MAX_REQUEST_BODY_SIZE"));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list("https://a.example, https://b.example  https://c.example"),
            vec!["https://a.example", "https://b.example", "https://c.example"]
        );
        assert!(split_list("  , ").is_empty());
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("PRETTY".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_metrics_addr() {
        assert_eq!(
            Config::default().metrics_addr().unwrap().port(),
            9090
        );

        let config = Config {
            metrics_port: 0,
            ..Config::default()
        };
        assert!(config.metrics_addr().is_none());
    }
}
