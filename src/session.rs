//! Authenticated HTTP session with retry and backoff semantics
//!
//! Wraps a [`reqwest::Client`] with bearer-token authentication and an
//! optional "robust mode" that transparently retries connection errors,
//! gateway errors (5xx) and rate limits (429). Client errors (4xx) are
//! never retried; they are the caller's fault and come back unmodified.

use chrono::{NaiveDateTime, Utc};
use reqwest::{Client, Method, Response};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::ClientOptions;
use crate::error::Error;

/// Wire format for timestamps, shared with the date mediator.
pub const WIRE_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Header carrying the rate-limit reset time on 429 responses.
const RETRY_RESET_HEADER: &str = "X-Retry-Reset";

/// An authenticated session against the remote API
#[derive(Debug, Clone)]
pub struct Session {
    http: Client,
    token: String,
    options: ClientOptions,
}

impl Session {
    /// Create a new session from an API token
    pub fn new(token: &str, options: ClientOptions) -> Result<Self, Error> {
        if token.trim().is_empty() {
            return Err(Error::config("API token not given or token is empty"));
        }
        url::Url::parse(&options.base_url)?;
        let mut builder = Client::builder();
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self {
            http,
            token: token.trim().to_string(),
            options,
        })
    }

    /// The options this session was created with
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Build an absolute URL below the configured base URL
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.options.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Issue a GET request
    pub async fn get(
        &self,
        url: &str,
        query: Option<&[(&str, String)]>,
    ) -> Result<Response, Error> {
        self.request(Method::GET, url, query, None).await
    }

    /// Issue a POST request with an optional JSON body
    pub async fn post(&self, url: &str, body: Option<&Value>) -> Result<Response, Error> {
        self.request(Method::POST, url, None, body).await
    }

    /// Issue a PUT request with an optional JSON body
    pub async fn put(&self, url: &str, body: Option<&Value>) -> Result<Response, Error> {
        self.request(Method::PUT, url, None, body).await
    }

    /// Convert a non-success response into [`Error::Api`]
    pub async fn check(response: Response) -> Result<Response, Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Api { status, body })
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        query: Option<&[(&str, String)]>,
        body: Option<&Value>,
    ) -> Result<Response, Error> {
        if !self.options.robust {
            return Ok(self.send_once(method, url, query, body).await?);
        }

        let mut retries_left = self.options.max_retries;
        loop {
            let response = match self.send_once(method.clone(), url, query, body).await {
                Ok(response) => response,
                Err(err) if err.is_connect() || err.is_timeout() => {
                    log::warn!("Connection error while accessing the API: {}", err);
                    retries_left = retries_left.saturating_sub(1);
                    if retries_left == 0 {
                        return Err(err.into());
                    }
                    sleep(self.options.retry_delay).await;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            // All retries used up: hand back whatever we got.
            if retries_left == 0 {
                return Ok(response);
            }

            let status = response.status();
            if status.as_u16() < 400 {
                return Ok(response);
            }

            if status.as_u16() == 429 {
                retries_left -= 1;
                let wait = rate_limit_wait(&response, self.options.retry_delay);
                log::debug!(
                    "429 Too Many Requests, waiting {:.1} s before retrying",
                    wait.as_secs_f64()
                );
                sleep(wait).await;
                continue;
            }

            if status.is_client_error() {
                log::error!("HTTP error happened, status: {}", status);
                log::error!("* method: {}", method);
                log::error!("* url: {}", url);
                if let Some(body) = body {
                    log::error!("* json: {}", body);
                }
                // 4xx is most likely our own fault: return immediately.
                return Ok(response);
            }

            // 5xx, most likely 502 Bad Gateway or 504 Gateway Timeout.
            retries_left -= 1;
            log::warn!(
                "Response from URL \"{}\" with status code {}. Retrying in {:.1} s ...",
                url,
                status,
                self.options.retry_delay.as_secs_f64()
            );
            sleep(self.options.retry_delay).await;
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        query: Option<&[(&str, String)]>,
        body: Option<&Value>,
    ) -> Result<Response, reqwest::Error> {
        let mut req = self.http.request(method, url).bearer_auth(&self.token);
        if let Some(query) = query {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send().await
    }

    /// Upload a file and attach it to a field of one remote item.
    ///
    /// Returns the file id assigned by the remote service.
    pub async fn upload_attachment(
        &self,
        item_id: i64,
        field: &str,
        data: Vec<u8>,
        file_name: &str,
    ) -> Result<i64, Error> {
        log::info!("Uploading and attaching file {} to item {}", file_name, item_id);
        let mime = mime_guess::from_path(file_name).first_or_octet_stream();
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str(mime.as_ref())
            .map_err(Error::Http)?;
        let form = reqwest::multipart::Form::new()
            .text("filename", file_name.to_string())
            .part("file", part);

        let upload_resp = self
            .http
            .post(self.url("file/upload"))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        let upload_resp = Self::check(upload_resp).await?;
        let uploaded: Value = upload_resp.json().await?;
        let file_id = uploaded
            .get("file_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::invalid_value("upload response carries no file_id"))?;

        let payload = serde_json::json!({ field: file_id });
        let attach_resp = self
            .put(&self.url(&format!("item/{}/value", item_id)), Some(&payload))
            .await?;
        Self::check(attach_resp).await?;
        Ok(file_id)
    }
}

/// How long to wait before retrying a rate-limited request.
///
/// The reset header carries a UTC timestamp; a second of slack is added
/// on top and waits never drop below one second.
fn rate_limit_wait(response: &Response, fallback: Duration) -> Duration {
    let raw = match response
        .headers()
        .get(RETRY_RESET_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(raw) => raw,
        None => return fallback,
    };
    match NaiveDateTime::parse_from_str(raw, WIRE_DATETIME_FORMAT) {
        Ok(reset) => {
            let now = Utc::now().naive_utc();
            let seconds = (reset - now).num_milliseconds() as f64 / 1000.0;
            Duration::from_secs_f64(seconds.max(1.0) + 1.0)
        }
        Err(_) => fallback,
    }
}
