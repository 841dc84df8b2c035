//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::{
    middleware::internal::InternalTokens, services::authenticator::RateLimitDefaults,
    services::pricing_client::PricingConfig,
};

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT`: HTTP server port, defaults to 8020
/// - `REDIS_URL`: counter store; in-process counters when unset
/// - `APP_ENV`: `local` and `development` relax the internal origin check
/// - `APP_DEBUG`: expose causes of 500 responses
/// - `PRODUCTS_SERVICE_URL`, `PRODUCTS_SERVICE_TIMEOUT`,
///   `PRODUCTS_SERVICE_RETRY`, `PRODUCTS_SERVICE_RETRY_DELAY_MS`
/// - `INTERNAL_PRODUCTS_TOKEN`, `INTERNAL_SALES_TOKEN`, `INTERNAL_GATEWAY_TOKEN`
/// - `RATE_LIMIT_FRONTEND`, `RATE_LIMIT_ADMIN`, `RATE_LIMIT_INTERNAL`
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    pub redis_url: Option<String>,

    #[serde(default = "default_app_env")]
    pub app_env: String,

    #[serde(default)]
    pub app_debug: bool,

    #[serde(default = "default_products_url")]
    pub products_service_url: String,

    /// Seconds
    #[serde(default = "default_products_timeout")]
    pub products_service_timeout: u64,

    /// Total attempts per lookup
    #[serde(default = "default_products_retry")]
    pub products_service_retry: u32,

    #[serde(default = "default_products_retry_delay_ms")]
    pub products_service_retry_delay_ms: u64,

    pub internal_products_token: Option<String>,
    pub internal_sales_token: Option<String>,
    pub internal_gateway_token: Option<String>,

    #[serde(default = "default_rate_limit_frontend")]
    pub rate_limit_frontend: i32,

    #[serde(default = "default_rate_limit_admin")]
    pub rate_limit_admin: i32,

    #[serde(default = "default_rate_limit_internal")]
    pub rate_limit_internal: i32,
}

/// A configuration value that parsed but cannot be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is not a valid URL: {source}")]
    InvalidUrl {
        name: &'static str,
        source: url::ParseError,
    },

    #[error("{name} must use one of {expected:?}, got '{scheme}'")]
    UnsupportedScheme {
        name: &'static str,
        scheme: String,
        expected: &'static [&'static str],
    },

    #[error("{0} must be at least 1")]
    NotPositive(&'static str),
}

fn check_url(
    name: &'static str,
    value: &str,
    expected: &'static [&'static str],
) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|source| ConfigError::InvalidUrl { name, source })?;
    if !expected.contains(&url.scheme()) {
        return Err(ConfigError::UnsupportedScheme {
            name,
            scheme: url.scheme().to_string(),
            expected,
        });
    }
    Ok(url)
}

fn default_port() -> u16 {
    8020
}

fn default_app_env() -> String {
    "production".to_string()
}

fn default_products_url() -> String {
    "http://localhost:8010".to_string()
}

fn default_products_timeout() -> u64 {
    10
}

fn default_products_retry() -> u32 {
    3
}

fn default_products_retry_delay_ms() -> u64 {
    100
}

fn default_rate_limit_frontend() -> i32 {
    60
}

fn default_rate_limit_admin() -> i32 {
    120
}

fn default_rate_limit_internal() -> i32 {
    1000
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>()
    }

    /// Reject values that deserialize fine but would fail at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("DATABASE_URL", &self.database_url, &["postgres", "postgresql"])?;
        check_url("PRODUCTS_SERVICE_URL", &self.products_service_url, &["http", "https"])?;
        if let Some(redis_url) = &self.redis_url {
            check_url("REDIS_URL", redis_url, &["redis", "rediss"])?;
        }
        if self.products_service_retry == 0 {
            return Err(ConfigError::NotPositive("PRODUCTS_SERVICE_RETRY"));
        }
        for (name, value) in [
            ("RATE_LIMIT_FRONTEND", self.rate_limit_frontend),
            ("RATE_LIMIT_ADMIN", self.rate_limit_admin),
            ("RATE_LIMIT_INTERNAL", self.rate_limit_internal),
        ] {
            if value < 1 {
                return Err(ConfigError::NotPositive(name));
            }
        }
        Ok(())
    }

    /// Whether the service runs on a developer machine.
    pub fn is_local(&self) -> bool {
        matches!(self.app_env.as_str(), "local" | "development")
    }

    pub fn pricing(&self) -> PricingConfig {
        PricingConfig {
            base_url: self.products_service_url.clone(),
            service_token: self.internal_sales_token.clone(),
            timeout: Duration::from_secs(self.products_service_timeout),
            attempts: self.products_service_retry,
            retry_delay: Duration::from_millis(self.products_service_retry_delay_ms),
            health_timeout: Duration::from_secs(5),
        }
    }

    pub fn internal_tokens(&self) -> InternalTokens {
        InternalTokens {
            products: self.internal_products_token.clone(),
            sales: self.internal_sales_token.clone(),
            gateway: self.internal_gateway_token.clone(),
            allow_any_origin: self.is_local(),
        }
    }

    pub fn rate_limits(&self) -> RateLimitDefaults {
        RateLimitDefaults {
            frontend: self.rate_limit_frontend,
            admin: self.rate_limit_admin,
            internal: self.rate_limit_internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        envy::from_iter::<_, Config>(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
        .unwrap()
    }

    #[test]
    fn defaults_apply() {
        let config = from_pairs(&[("DATABASE_URL", "postgres://localhost/sales")]);
        assert_eq!(config.server_port, 8020);
        assert_eq!(config.redis_url, None);
        assert!(!config.app_debug);
        assert!(!config.is_local());

        let pricing = config.pricing();
        assert_eq!(pricing.base_url, "http://localhost:8010");
        assert_eq!(pricing.attempts, 3);
        assert_eq!(pricing.retry_delay, Duration::from_millis(100));
        assert_eq!(pricing.timeout, Duration::from_secs(10));

        assert_eq!(config.rate_limits(), RateLimitDefaults::default());
    }

    #[test]
    fn overrides_are_read() {
        let config = from_pairs(&[
            ("DATABASE_URL", "postgres://localhost/sales"),
            ("APP_ENV", "development"),
            ("APP_DEBUG", "true"),
            ("PRODUCTS_SERVICE_RETRY", "5"),
            ("INTERNAL_SALES_TOKEN", "s3cret"),
            ("RATE_LIMIT_FRONTEND", "10"),
        ]);
        assert!(config.is_local());
        assert!(config.app_debug);
        assert_eq!(config.pricing().attempts, 5);
        assert_eq!(config.pricing().service_token.as_deref(), Some("s3cret"));
        assert_eq!(config.internal_tokens().sales.as_deref(), Some("s3cret"));
        assert!(config.internal_tokens().allow_any_origin);
        assert_eq!(config.rate_limits().frontend, 10);
    }

    #[test]
    fn validate_checks_urls_and_limits() {
        let config = from_pairs(&[("DATABASE_URL", "postgres://localhost/sales")]);
        assert!(config.validate().is_ok());

        let config = from_pairs(&[
            ("DATABASE_URL", "postgres://localhost/sales"),
            ("PRODUCTS_SERVICE_URL", "ftp://products"),
        ]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedScheme { name: "PRODUCTS_SERVICE_URL", .. })
        ));

        let config = from_pairs(&[("DATABASE_URL", "not a url")]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { name: "DATABASE_URL", .. })
        ));

        let config = from_pairs(&[
            ("DATABASE_URL", "postgres://localhost/sales"),
            ("RATE_LIMIT_ADMIN", "0"),
        ]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive("RATE_LIMIT_ADMIN"))
        ));
    }

    #[test]
    fn database_url_is_required() {
        let result = envy::from_iter::<_, Config>(Vec::<(String, String)>::new());
        assert!(result.is_err());
    }
}
