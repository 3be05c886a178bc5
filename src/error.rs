use thiserror::Error;

pub type Result<T> = std::result::Result<T, UsageError>;

/// Errors surfaced by the collection, aggregation and retention pipeline.
#[derive(Error, Debug)]
pub enum UsageError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("failed to reach the admin API: {0}")]
    Connectivity(String),

    #[error("admin API rejected the request with status {status}: {body}")]
    Authentication { status: u16, body: String },

    #[error("failed to decode admin API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("storage failure: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("no data available: {0}")]
    NoData(String),
}

impl From<url::ParseError> for UsageError {
    fn from(err: url::ParseError) -> Self {
        UsageError::Configuration(format!("invalid endpoint URL: {err}"))
    }
}

impl From<sqlx::migrate::MigrateError> for UsageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        UsageError::Persistence(err.into())
    }
}

impl From<config::ConfigError> for UsageError {
    fn from(err: config::ConfigError) -> Self {
        UsageError::Configuration(err.to_string())
    }
}
