// Application configuration loaded from the environment

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set in environment")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Runtime settings
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,
    /// Base URL of the messaging service; `None` disables outbound dispatch
    pub messaging_api_url: Option<String>,
    pub dispatch_delay: Duration,
    /// Feed polling interval; `None` disables the poller
    pub import_poll_interval: Option<Duration>,
    pub http_timeout: Duration,
}

impl AppConfig {
    /// Read the configuration from process environment variables
    ///
    /// Call `dotenv::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let poll_secs: u64 = parse_or(&lookup, "IMPORT_POLL_INTERVAL_SECS", 300)?;
        let messaging_api_url = lookup("MESSAGING_API_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Ok(Self {
            database_url,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 8080)?,
            messaging_api_url,
            dispatch_delay: Duration::from_millis(parse_or(&lookup, "DISPATCH_DELAY_MS", 1000)?),
            import_poll_interval: (poll_secs > 0).then(|| Duration::from_secs(poll_secs)),
            http_timeout: Duration::from_secs(parse_or(&lookup, "HTTP_TIMEOUT_SECS", 10)?),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("DATABASE_URL", "postgresql://localhost/cashback")]).unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.dispatch_delay, Duration::from_millis(1000));
        assert_eq!(config.import_poll_interval, Some(Duration::from_secs(300)));
        assert!(config.messaging_api_url.is_none());
    }

    #[test]
    fn test_database_url_is_required() {
        assert!(matches!(config(&[]), Err(ConfigError::Missing("DATABASE_URL"))));
    }

    #[test]
    fn test_zero_poll_interval_disables_poller() {
        let config = config(&[
            ("DATABASE_URL", "postgresql://localhost/cashback"),
            ("IMPORT_POLL_INTERVAL_SECS", "0"),
            ("MESSAGING_API_URL", "http://messaging.local"),
        ])
        .unwrap();

        assert!(config.import_poll_interval.is_none());
        assert_eq!(config.messaging_api_url.as_deref(), Some("http://messaging.local"));
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let result = config(&[("DATABASE_URL", "postgresql://localhost/cashback"), ("PORT", "eighty")]);
        assert!(matches!(result, Err(ConfigError::Invalid { name: "PORT", .. })));
    }
}
