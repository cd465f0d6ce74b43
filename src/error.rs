//! Error handling for the Podio Rust client

use std::fmt;
use thiserror::Error;

/// Unified error type for the Podio Rust client
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP related errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local cache database errors
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The remote API answered with a non-success status code
    #[error("API error (status {status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },

    /// A field's declared type has no registered mediator
    #[error("Field type \"{0}\" is not supported")]
    UnsupportedFieldType(String),

    /// A descriptor does not name any field in the supplied schema
    #[error("Field \"{0}\" not found")]
    FieldNotFound(String),

    /// A native value could not be converted into the wire form
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// A cache lookup matched zero rows
    #[error("Cached item not found: {0}")]
    CachedItemNotFound(String),

    /// A unique lookup or index found more than one matching row
    #[error("Natural keys must be unique: {0}")]
    DuplicateNaturalKey(String),

    /// An app has no stored cache configuration yet
    #[error("App {0} has no cache configuration, call cache_app first")]
    AppNotCached(i64),

    /// Client configuration errors, e.g. a missing API token
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operation is deliberately not implemented
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),
}

impl Error {
    /// Create a new invalid-value error
    pub fn invalid_value<T: fmt::Display>(msg: T) -> Self {
        Error::InvalidValue(msg.to_string())
    }

    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new cache-miss error
    pub fn not_found<T: fmt::Display>(msg: T) -> Self {
        Error::CachedItemNotFound(msg.to_string())
    }
}
