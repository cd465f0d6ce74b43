//! Configuration options for the Podio client

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::Error;

/// Environment variable consulted for the API token.
pub const TOKEN_ENV_VAR: &str = "PODIO_API_KEY";

/// Default credentials file consulted when neither an explicit token
/// nor the environment variable is available.
pub const DEFAULT_CREDENTIALS_FILE: &str = "podio_credentials.txt";

/// Configuration options for the Podio client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Base URL of the remote API
    pub base_url: String,

    /// Whether transient errors are retried transparently
    pub robust: bool,

    /// Maximum number of attempts in robust mode
    pub max_retries: u32,

    /// Delay between retries for connection errors and 5xx responses
    pub retry_delay: Duration,

    /// Page size used when iterating whole item collections
    pub page_size: u32,

    /// The request timeout
    pub request_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: "https://api.podio.com".to_string(),
            robust: true,
            max_retries: 5,
            retry_delay: Duration::from_secs(3),
            page_size: 300,
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl ClientOptions {
    /// Set the base URL of the remote API
    pub fn with_base_url(mut self, value: &str) -> Self {
        self.base_url = value.trim_end_matches('/').to_string();
        self
    }

    /// Enable or disable transparent retries
    pub fn with_robust(mut self, value: bool) -> Self {
        self.robust = value;
        self
    }

    /// Set the maximum number of attempts in robust mode
    pub fn with_max_retries(mut self, value: u32) -> Self {
        self.max_retries = value;
        self
    }

    /// Set the delay between retries
    pub fn with_retry_delay(mut self, value: Duration) -> Self {
        self.retry_delay = value;
        self
    }

    /// Set the page size for collection iteration
    pub fn with_page_size(mut self, value: u32) -> Self {
        self.page_size = value;
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }
}

/// Read the API token from the `PODIO_API_KEY` environment variable.
pub fn token_from_env() -> Option<String> {
    match env::var(TOKEN_ENV_VAR) {
        Ok(token) if !token.trim().is_empty() => {
            log::info!("Loading API token from environment.");
            Some(token.trim().to_string())
        }
        _ => {
            log::info!("Environment variable {} is not set.", TOKEN_ENV_VAR);
            None
        }
    }
}

/// Read the API token from the first line of a credentials file.
pub fn token_from_file<P: AsRef<Path>>(path: P) -> Result<String, Error> {
    let content = fs::read_to_string(path.as_ref())
        .map_err(|err| Error::config(format!("cannot read credentials file: {}", err)))?;
    let token = content.lines().next().unwrap_or("").trim().to_string();
    if token.is_empty() {
        return Err(Error::config(format!(
            "credentials file {} does not contain a token",
            path.as_ref().display()
        )));
    }
    Ok(token)
}

/// Resolve the API token with the usual precedence: explicit value,
/// then environment, then a credentials file.
pub fn discover_token(
    explicit: Option<&str>,
    credentials_file: Option<&Path>,
) -> Result<String, Error> {
    if let Some(token) = explicit {
        if token.trim().is_empty() {
            return Err(Error::config("API token not given or token is empty"));
        }
        return Ok(token.trim().to_string());
    }
    if let Some(token) = token_from_env() {
        return Ok(token);
    }
    log::info!("Loading API token from credentials file.");
    match credentials_file {
        Some(path) => token_from_file(path),
        None => token_from_file(DEFAULT_CREDENTIALS_FILE),
    }
}
