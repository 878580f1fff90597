//! HTTP client for the shortener that answers from the local cache when it
//! can.

use reqwest::header::{LOCATION, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode, redirect};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::api::dto::shorten::ShortenResponse;
use crate::client::ClientError;
use crate::client::events::EventSubscriber;
use crate::client::local_cache::LocalCache;
use crate::utils::url_normalizer::canonicalize_url;

/// Retries after a 429 before giving up.
pub const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Wait used when a 429 carries no hint.
const DEFAULT_RETRY_AFTER: u64 = 60;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
    #[serde(rename = "retryAfter")]
    retry_after: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

pub struct ShortenerClient {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    base_url: String,
    cache: Arc<LocalCache>,
    max_retries: u32,
}

impl ShortenerClient {
    /// Client for the service at `base_url`.
    ///
    /// Redirects are not followed so that `resolve` can read the target
    /// from `Location`.
    pub fn new(base_url: &str, cache: Arc<LocalCache>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let stream_http = reqwest::Client::builder().build()?;

        Ok(Self {
            http,
            stream_http,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache,
            max_retries: MAX_RATE_LIMIT_RETRIES,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.cache
    }

    /// Subscriber that keeps this client's cache in sync with the server.
    pub fn event_subscriber(&self) -> EventSubscriber {
        EventSubscriber::new(self.stream_http.clone(), &self.base_url)
    }

    pub fn short_url(&self, code: &str) -> String {
        format!("{}/{}", self.base_url, code)
    }

    /// Returns the short URL for `url`, from the local cache when held.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidUrl`] if the URL cannot be canonicalized
    /// - [`ClientError::RateLimited`] once the retries are spent
    /// - [`ClientError::Api`] for any other error response
    pub async fn shorten(&self, url: &str) -> Result<String, ClientError> {
        let canonical = canonicalize_url(url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;

        if let Some(code) = self.cache.get(&canonical) {
            debug!(url = %canonical, "Local cache hit");
            return Ok(self.short_url(&code));
        }

        let endpoint = format!("{}/api/shorten", self.base_url);
        let response = self
            .send_with_retry(|| self.http.post(&endpoint).json(&json!({ "url": canonical })))
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let body: ShortenResponse = response.json().await?;
        let code = body
            .short_url
            .rsplit('/')
            .next()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ClientError::InvalidResponse(body.short_url.clone()))?;

        self.cache.put_mapping(&canonical, code);
        Ok(body.short_url)
    }

    /// Local-only lookup of a short code.
    pub fn resolve_cached(&self, code: &str) -> Option<String> {
        self.cache.get(code)
    }

    /// Returns the original URL for `code`, asking the server on a local miss.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Api`] with status 404 for unknown codes
    /// - [`ClientError::InvalidResponse`] if a redirect lacks `Location`
    pub async fn resolve(&self, code: &str) -> Result<String, ClientError> {
        if let Some(original) = self.resolve_cached(code) {
            debug!(code, "Local cache hit");
            return Ok(original);
        }

        let endpoint = self.short_url(code);
        let response = self.send_with_retry(|| self.http.get(&endpoint)).await?;

        if !response.status().is_redirection() {
            return Err(api_error(response).await);
        }

        let original = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ClientError::InvalidResponse("redirect without Location".into()))?;

        self.cache.put_mapping(&original, code);
        Ok(original)
    }

    /// Sends the request built by `build`, retrying 429 responses after the
    /// server's `retryAfter` hint.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Response, ClientError> {
        let mut retries = 0;

        loop {
            let response = build().send().await?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            let header_hint = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let envelope = response.json::<ErrorEnvelope>().await.unwrap_or_default();
            let retry_after = envelope
                .retry_after
                .or(header_hint)
                .unwrap_or(DEFAULT_RETRY_AFTER);

            if retries >= self.max_retries {
                return Err(ClientError::RateLimited { retry_after });
            }
            retries += 1;

            info!(
                attempt = retries,
                max = self.max_retries,
                retry_after,
                "Rate limited, waiting before retry"
            );
            tokio::time::sleep(Duration::from_secs(retry_after)).await;
        }
    }
}

async fn api_error(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response
        .json::<ErrorEnvelope>()
        .await
        .unwrap_or_default()
        .error
        .unwrap_or_default();

    ClientError::Api {
        status,
        code: body.code,
        message: body.message,
    }
}
