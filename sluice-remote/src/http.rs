use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::{RemoteConfigError, RemoteWriteConfig, StoreError, WriteClient};

/// Version of the remote-write protocol spoken by [`HttpWriteClient`].
pub const REMOTE_WRITE_VERSION: &str = "0.1.0";

/// Header announcing the remote-write protocol version.
const VERSION_HEADER: &str = "x-prometheus-remote-write-version";

/// Maximum number of response body bytes quoted in error messages.
const MAX_ERROR_BODY: usize = 512;

const USER_AGENT: &str = concat!("sluice/", env!("CARGO_PKG_VERSION"));

/// An error creating an [`HttpWriteClient`].
#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    /// The endpoint configuration is invalid.
    #[error(transparent)]
    Config(#[from] RemoteConfigError),
    /// A configured header is not a valid HTTP header.
    #[error("invalid header {0:?}")]
    InvalidHeader(String),
    /// The HTTP client could not be created.
    #[error("failed to create http client")]
    Build(#[source] reqwest::Error),
}

/// A [`WriteClient`] that POSTs payloads to a remote-write HTTP endpoint.
pub struct HttpWriteClient {
    name: String,
    url: Url,
    headers: HeaderMap,
    retry_on_http_429: bool,
    client: reqwest::Client,
}

impl HttpWriteClient {
    /// Creates a client for the configured endpoint.
    pub fn new(config: &RemoteWriteConfig) -> Result<Self, HttpClientError> {
        let url = config.parsed_url()?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| HttpClientError::InvalidHeader(name.clone()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| HttpClientError::InvalidHeader(name.clone()))?;
            headers.insert(header_name, header_value);
        }

        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("snappy"));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-protobuf"),
        );
        headers.insert(
            VERSION_HEADER,
            HeaderValue::from_static(REMOTE_WRITE_VERSION),
        );

        let client = reqwest::ClientBuilder::new()
            .timeout(config.remote_timeout())
            .user_agent(USER_AGENT)
            .build()
            .map_err(HttpClientError::Build)?;

        Ok(Self {
            name: config.name().to_owned(),
            url,
            headers,
            retry_on_http_429: config.retry_on_http_429,
            client,
        })
    }

    fn classify(&self, status: StatusCode, retry_after: Option<Duration>, body: &str) -> StoreError {
        let message = format!("server returned HTTP status {status}: {body}");

        if status.is_server_error()
            || (status == StatusCode::TOO_MANY_REQUESTS && self.retry_on_http_429)
        {
            StoreError::recoverable_after(message, retry_after)
        } else {
            StoreError::unrecoverable(message)
        }
    }
}

impl fmt::Debug for HttpWriteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpWriteClient")
            .field("name", &self.name)
            .field("url", &self.url.as_str())
            .finish()
    }
}

#[async_trait]
impl WriteClient for HttpWriteClient {
    async fn store(&self, payload: Bytes) -> Result<(), StoreError> {
        let result = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .body(payload)
            .send()
            .await;

        // The request never got a response, so sending it again may succeed.
        let mut response = result
            .map_err(|err| StoreError::recoverable(format!("failed to send request: {err}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| parse_retry_after(value, Utc::now()));

        let mut body = Vec::with_capacity(MAX_ERROR_BODY);
        while body.len() < MAX_ERROR_BODY {
            match response.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) | Err(_) => break,
            }
        }
        body.truncate(MAX_ERROR_BODY);

        Err(self.classify(status, retry_after, &String::from_utf8_lossy(&body)))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> &str {
        self.url.as_str()
    }
}

/// Parses a `Retry-After` header value.
///
/// Accepts delta-seconds and HTTP dates. Dates that are not in the future yield no hint.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delay = date.with_timezone(&Utc) - now;
    delay.to_std().ok().filter(|delay| !delay.is_zero())
}
