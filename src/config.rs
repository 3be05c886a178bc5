use serde::Deserialize;

use crate::error::{Result, UsageError};

/// Main configuration for the usage collector.
///
/// Values are resolved in layers: built-in defaults, then an optional config
/// file (`config/rgw-usage.*` or `/etc/rgw-usage/config.*`), then environment
/// variables (`RGW_USAGE__S3__ENDPOINT` -> `s3.endpoint`), then command-line
/// flags.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service-level settings
    #[serde(default)]
    pub service: ServiceConfig,
    /// Admin API endpoint and credentials
    #[serde(default)]
    pub s3: S3Config,
    /// Local usage database
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Admin API endpoint and signing credentials
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// RGW endpoint URL, e.g. `https://rgw.example.com`
    #[serde(default)]
    pub endpoint: String,
    /// Access key of a user with bucket-read admin caps
    #[serde(default)]
    pub access_key: String,
    /// Secret key matching `access_key`
    #[serde(default)]
    pub secret_key: String,
    /// Signing region
    #[serde(default = "default_region")]
    pub region: String,
    /// Service name used in the SigV4 credential scope. Most RGW deployments
    /// expect `s3`; some are configured for `rgw` instead. A mismatch fails
    /// authentication, and there is no automatic fallback between the two:
    /// set this to whatever the cluster is configured with.
    #[serde(default = "default_service_scope")]
    pub service_scope: String,
    /// Client-side request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Local usage database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path, created on first use
    #[serde(default = "default_db_path")]
    pub path: String,
}

/// Command-line values that take precedence over file and environment sources
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
    pub db_path: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_region() -> String {
    "default".to_string()
}

fn default_service_scope() -> String {
    "s3".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_db_path() -> String {
    std::env::var("HOME")
        .map(|home| format!("{home}/.rgw-usage.db"))
        .unwrap_or_else(|_| ".rgw-usage.db".to_string())
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            region: default_region(),
            service_scope: default_service_scope(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Config {
    /// Load configuration from files, environment and command-line overrides.
    pub fn load(overrides: &Overrides) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/rgw-usage").required(false))
            .add_source(config::File::with_name("/etc/rgw-usage/config").required(false))
            .add_source(
                config::Environment::with_prefix("RGW_USAGE")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(endpoint) = &overrides.endpoint {
            builder = builder.set_override("s3.endpoint", endpoint.as_str())?;
        }
        if let Some(access_key) = &overrides.access_key {
            builder = builder.set_override("s3.access_key", access_key.as_str())?;
        }
        if let Some(secret_key) = &overrides.secret_key {
            builder = builder.set_override("s3.secret_key", secret_key.as_str())?;
        }
        if let Some(region) = &overrides.region {
            builder = builder.set_override("s3.region", region.as_str())?;
        }
        if let Some(db_path) = &overrides.db_path {
            builder = builder.set_override("database.path", db_path.as_str())?;
        }

        let config = builder.build()?;
        config.try_deserialize().map_err(Into::into)
    }

    /// Check that everything needed for signed admin calls is present.
    pub fn validate_credentials(&self) -> Result<()> {
        if self.s3.endpoint.is_empty() {
            return Err(UsageError::Configuration(
                "missing S3 endpoint (set --endpoint or S3_ENDPOINT)".to_string(),
            ));
        }
        if self.s3.access_key.is_empty() {
            return Err(UsageError::Configuration(
                "missing S3 access key (set --access-key or S3_ACCESS_KEY)".to_string(),
            ));
        }
        if self.s3.secret_key.is_empty() {
            return Err(UsageError::Configuration(
                "missing S3 secret key (set --secret-key or S3_SECRET_KEY)".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s3 = S3Config::default();
        assert_eq!(s3.region, "default");
        assert_eq!(s3.service_scope, "s3");
        assert_eq!(s3.request_timeout_secs, 30);
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let config = Config {
            service: ServiceConfig::default(),
            s3: S3Config::default(),
            database: DatabaseConfig::default(),
        };

        let err = config.validate_credentials().unwrap_err();
        assert!(matches!(err, UsageError::Configuration(_)));
    }

    #[test]
    fn overrides_take_precedence() {
        let overrides = Overrides {
            endpoint: Some("https://rgw.example.com".to_string()),
            access_key: Some("AKIAEXAMPLE".to_string()),
            secret_key: Some("secret".to_string()),
            region: None,
            db_path: Some("/tmp/usage-test.db".to_string()),
        };

        let config = Config::load(&overrides).unwrap();
        assert_eq!(config.s3.endpoint, "https://rgw.example.com");
        assert_eq!(config.s3.region, "default");
        assert_eq!(config.database.path, "/tmp/usage-test.db");
        config.validate_credentials().unwrap();
    }
}
