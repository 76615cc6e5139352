//! HTTP fetcher with rate limiting
//!
//! Wraps a reqwest client behind the `Fetcher` trait. A single governor
//! limiter is shared by every worker, so the configured rate is a ceiling for
//! the whole run rather than per worker.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT},
    Client, StatusCode,
};
use tracing::debug;

use crate::domain::{FetchError, Fetcher, RawDocument, SourceRef};
use crate::infrastructure::config::HttpConfig;

/// Fetches `http` and `https` sources
pub struct HttpFetcher {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: HttpConfig,
}

impl HttpFetcher {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(config.max_redirects)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
            .context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .context("Rate limit must be greater than 0")?,
        );

        Ok(Self {
            client,
            rate_limiter: RateLimiter::direct(quota),
            config,
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// True for sources this fetcher can handle
    pub fn supports(source: &SourceRef) -> bool {
        source
            .as_url()
            .is_some_and(|url| matches!(url.scheme(), "http" | "https"))
    }
}

fn map_request_error(error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::transport(error)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, source: &SourceRef) -> Result<RawDocument, FetchError> {
        let url = source
            .as_url()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or_else(|| FetchError::Transport(format!("not an http(s) URL: {source}")))?;

        self.rate_limiter.until_ready().await;
        debug!("Fetching URL: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_request_error(&e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(FetchError::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::Transport(format!("HTTP status {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await.map_err(|e| map_request_error(&e))?;

        debug!("Fetched {} ({}, {} bytes)", source, status, body.len());
        let mut raw = RawDocument::new(source.clone(), body.to_vec()).with_status(status.as_u16());
        if let Some(content_type) = content_type {
            raw = raw.with_content_type(&content_type);
        }
        Ok(raw)
    }
}
