//! Manifest retrieval from team-configured URLs.
//!
//! The fetcher is the engine's only network dependency, abstracted behind
//! [`ManifestFetcher`] so tests can substitute a mock. Network, timeout, and
//! non-2xx failures are opaque to callers as a [`FetchFailure`]; a fetch
//! timeout is treated identically to any other fetch failure and must be
//! finite so a hung manifest host cannot occupy a team's single-flight guard.

use std::time::Duration;

use async_trait::async_trait;

/// Default connect timeout for manifest requests.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default end-to-end request timeout for manifest requests.
///
/// Short relative to any sane scheduled sync interval.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum bytes of a non-2xx response body carried into error strings.
const ERROR_BODY_LIMIT: usize = 256;

/// Why a manifest fetch failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchFailure {
    /// The configured URL is not a valid absolute URL.
    #[error("invalid manifest URL '{url}': {message}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Parse failure detail.
        message: String,
    },

    /// The request did not complete within the timeout.
    #[error("manifest fetch timed out after {timeout_ms} ms")]
    Timeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// A connection or transport error.
    #[error("manifest fetch failed: {message}")]
    Network {
        /// Transport failure detail.
        message: String,
    },

    /// The host answered with a non-2xx status.
    #[error("manifest host returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The response body was not parseable JSON.
    #[error("manifest body is not valid JSON: {message}")]
    InvalidBody {
        /// Parse failure detail.
        message: String,
    },
}

/// Retrieves a raw manifest document from a URL.
///
/// Implementations must not retry internally; the orchestrator treats one
/// failed fetch as one failed run and the scheduler owns retry cadence.
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    /// Fetches and parses the document at `url`.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchFailure`] describing why retrieval failed. The caller
    /// treats every variant identically: the run fails closed.
    async fn fetch(&self, url: &str) -> std::result::Result<serde_json::Value, FetchFailure>;
}

/// Production fetcher backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpManifestFetcher {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpManifestFetcher {
    /// Creates a fetcher with the default timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client could not be built.
    pub fn new() -> crate::error::Result<Self> {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a fetcher with explicit connect and request timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client could not be built.
    pub fn with_timeouts(
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| crate::error::Error::storage(format!("build HTTP client: {e}")))?;
        Ok(Self {
            client,
            request_timeout,
        })
    }
}

#[async_trait]
impl ManifestFetcher for HttpManifestFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<serde_json::Value, FetchFailure> {
        let parsed = reqwest::Url::parse(url).map_err(|e| FetchFailure::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let response = self
            .client
            .get(parsed)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchFailure::Timeout {
                        timeout_ms: u64::try_from(self.request_timeout.as_millis())
                            .unwrap_or(u64::MAX),
                    }
                } else {
                    FetchFailure::Network {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchFailure::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| FetchFailure::InvalidBody {
                message: e.to_string(),
            })
    }
}

/// Keeps error strings (and with them history rows) bounded.
fn truncate_body(body: &str) -> String {
    if body.len() <= ERROR_BODY_LIMIT {
        return body.to_string();
    }
    let mut end = ERROR_BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
