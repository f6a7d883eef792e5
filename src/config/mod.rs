//! Configuration management
//!
//! This module handles loading and parsing configuration for the NCO portal.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Token signing configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// External semantic matcher
    #[serde(default)]
    pub matcher: MatcherConfig,
    /// Application metadata and background jobs
    #[serde(default)]
    pub app: AppConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins (the frontend URLs)
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path or URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum pool connections for file databases
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    "data/nco_portal.db".to_string()
}

fn default_max_connections() -> u32 {
    10
}

/// Token signing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for access tokens
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Access token lifetime in hours
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_hours: default_token_ttl_hours(),
        }
    }
}

fn default_jwt_secret() -> String {
    "change-this-secret-in-production".to_string()
}

fn default_token_ttl_hours() -> i64 {
    24 * 7
}

/// External semantic matcher configuration.
///
/// When `base_url` is unset, searches use the local keyword fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_matcher_timeout")]
    pub timeout_secs: u64,
    /// Name recorded in the api_requests table
    #[serde(default = "default_matcher_service_name")]
    pub service_name: String,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_matcher_timeout(),
            service_name: default_matcher_service_name(),
        }
    }
}

fn default_matcher_timeout() -> u64 {
    10
}

fn default_matcher_service_name() -> String {
    "nco-matcher".to_string()
}

/// Application metadata and background jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment environment reported by the health check
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Interval of the search analytics rollup task
    #[serde(default = "default_rollup_interval")]
    pub analytics_rollup_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            analytics_rollup_interval_secs: default_rollup_interval(),
        }
    }
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_rollup_interval() -> u64 {
    3600
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - NCO_SERVER_HOST
    /// - NCO_SERVER_PORT
    /// - NCO_SERVER_CORS_ORIGINS (comma separated)
    /// - NCO_DATABASE_URL
    /// - NCO_AUTH_JWT_SECRET
    /// - NCO_AUTH_TOKEN_TTL_HOURS
    /// - NCO_MATCHER_BASE_URL
    /// - NCO_MATCHER_TIMEOUT_SECS
    /// - NCO_APP_ENVIRONMENT
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.jwt_secret must not be empty".to_string(),
            ));
        }
        if self.auth.token_ttl_hours <= 0 {
            return Err(ConfigError::ValidationError(
                "auth.token_ttl_hours must be positive".to_string(),
            ));
        }
        if self.app.analytics_rollup_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "app.analytics_rollup_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        // Server configuration
        if let Ok(host) = std::env::var("NCO_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("NCO_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(origins) = std::env::var("NCO_SERVER_CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }

        // Database configuration
        if let Ok(url) = std::env::var("NCO_DATABASE_URL") {
            self.database.url = url;
        }

        // Auth configuration
        if let Ok(secret) = std::env::var("NCO_AUTH_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Ok(ttl) = std::env::var("NCO_AUTH_TOKEN_TTL_HOURS") {
            if let Ok(ttl) = ttl.parse::<i64>() {
                self.auth.token_ttl_hours = ttl;
            }
        }

        // Matcher configuration
        if let Ok(url) = std::env::var("NCO_MATCHER_BASE_URL") {
            self.matcher.base_url = if url.trim().is_empty() { None } else { Some(url) };
        }
        if let Ok(timeout) = std::env::var("NCO_MATCHER_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                self.matcher.timeout_secs = timeout;
            }
        }

        if let Ok(environment) = std::env::var("NCO_APP_ENVIRONMENT") {
            self.app.environment = environment;
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared by every test that touches NCO_* variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
const ENV_KEYS: &[&str] = &[
    "NCO_SERVER_HOST",
    "NCO_SERVER_PORT",
    "NCO_SERVER_CORS_ORIGINS",
    "NCO_DATABASE_URL",
    "NCO_AUTH_JWT_SECRET",
    "NCO_AUTH_TOKEN_TTL_HOURS",
    "NCO_MATCHER_BASE_URL",
    "NCO_MATCHER_TIMEOUT_SECS",
    "NCO_APP_ENVIRONMENT",
];


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn valid_host_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            (0u8..=255, 0u8..=255, 0u8..=255, 0u8..=255)
                .prop_map(|(a, b, c, d)| format!("{}.{}.{}.{}", a, b, c, d)),
            Just("localhost".to_string()),
            "[a-z][a-z0-9]{0,10}",
        ]
    }

    fn valid_config_strategy() -> impl Strategy<Value = Config> {
        (
            valid_host_strategy(),
            1u16..=65535,
            prop::collection::vec("http://[a-z]{1,8}\\.example", 0..3),
            "[a-z][a-z0-9_/]{0,20}\\.db",
            "[A-Za-z0-9]{8,32}",
            1i64..1000,
            prop::option::of("http://[a-z]{1,8}:[0-9]{4}"),
            1u64..120,
        )
            .prop_map(
                |(host, port, cors_origins, url, secret, ttl, base_url, timeout)| Config {
                    server: ServerConfig { host, port, cors_origins },
                    database: DatabaseConfig { url, max_connections: 5 },
                    auth: AuthConfig { jwt_secret: secret, token_ttl_hours: ttl },
                    matcher: MatcherConfig {
                        base_url,
                        timeout_secs: timeout,
                        service_name: default_matcher_service_name(),
                    },
                    app: AppConfig::default(),
                },
            )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        /// Serializing a config to YAML and loading it back preserves every field
        #[test]
        fn config_yaml_roundtrip(config in valid_config_strategy()) {
            let yaml = serde_yaml::to_string(&config).expect("Failed to serialize config");

            let mut file = NamedTempFile::new().expect("Failed to create temp file");
            write!(file, "{}", yaml).expect("Failed to write config");

            let parsed = Config::load(file.path()).expect("Failed to parse config");

            prop_assert_eq!(config.server.host, parsed.server.host);
            prop_assert_eq!(config.server.port, parsed.server.port);
            prop_assert_eq!(config.server.cors_origins, parsed.server.cors_origins);
            prop_assert_eq!(config.database.url, parsed.database.url);
            prop_assert_eq!(config.auth.jwt_secret, parsed.auth.jwt_secret);
            prop_assert_eq!(config.auth.token_ttl_hours, parsed.auth.token_ttl_hours);
            prop_assert_eq!(config.matcher.base_url, parsed.matcher.base_url);
            prop_assert_eq!(config.matcher.timeout_secs, parsed.matcher.timeout_secs);
        }

        /// Any config missing whole sections still loads with defaults
        #[test]
        fn missing_sections_use_defaults(port in 1u16..=65535) {
            let mut file = NamedTempFile::new().expect("Failed to create temp file");
            write!(file, "server:\n  port: {}\n", port).expect("Failed to write config");

            let config = Config::load(file.path()).expect("Failed to parse config");

            prop_assert_eq!(config.server.port, port);
            prop_assert_eq!(config.database.url, default_database_url());
            prop_assert_eq!(config.auth.token_ttl_hours, default_token_ttl_hours());
            prop_assert!(config.matcher.base_url.is_none());
        }
    }
}
