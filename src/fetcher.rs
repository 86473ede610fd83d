//! Single-shot HTTP retrieval of the watched document.

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, CONTENT_TYPE};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// `User-Agent` sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Decoded response body plus the metadata worth logging.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: Url,
    /// HTTP response status.
    pub status: u16,
    /// Content-Type header, when present.
    pub content_type: Option<String>,
    /// When the body finished downloading.
    pub fetched_at: DateTime<Utc>,
    /// Body decoded to text using the response charset.
    pub body: String,
}

/// Errors surfaced while fetching the watched page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP client could not be constructed (bad header value, TLS init).
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    /// The request did not complete within the configured timeout.
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout {
        /// Requested URL.
        url: Url,
        /// Configured bound.
        timeout: Duration,
    },
    /// Connection, TLS or redirect failure.
    #[error("request to {url} failed: {source}")]
    Request {
        /// Requested URL.
        url: Url,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: Url,
        /// Response status.
        status: StatusCode,
    },
    /// Reading or decoding the response body failed.
    #[error("failed to read body of {url}: {source}")]
    Body {
        /// Requested URL.
        url: Url,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },
}

/// Source of page bodies.
pub trait PageFetcher {
    /// Performs one GET of `url`.
    fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError>;
}

/// Blocking `reqwest` fetcher with a bounded timeout and configurable `User-Agent`.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Builds a fetcher; `user_agent` falls back to [`DEFAULT_USER_AGENT`].
    pub fn new(timeout: Duration, user_agent: Option<&str>) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client, timeout })
    }
}

impl PageFetcher for HttpFetcher {
    fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|source| self.classify(url, source))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.clone(),
                status,
            });
        }

        let final_url = response.url().clone();
        let content_type = header_to_string(response.headers(), CONTENT_TYPE);
        let body = response.text().map_err(|source| {
            if source.is_timeout() {
                self.classify(url, source)
            } else {
                FetchError::Body {
                    url: url.clone(),
                    source,
                }
            }
        })?;

        tracing::debug!(
            url = %final_url,
            status = status.as_u16(),
            bytes = body.len(),
            content_type = content_type.as_deref().unwrap_or("-"),
            "fetched page"
        );

        Ok(FetchedPage {
            url: final_url,
            status: status.as_u16(),
            content_type,
            fetched_at: Utc::now(),
            body,
        })
    }
}

impl HttpFetcher {
    fn classify(&self, url: &Url, source: reqwest::Error) -> FetchError {
        if source.is_timeout() {
            FetchError::Timeout {
                url: url.clone(),
                timeout: self.timeout,
            }
        } else {
            FetchError::Request {
                url: url.clone(),
                source,
            }
        }
    }
}

fn header_to_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
