//! HTTP client with self-throttling for the resolver endpoints.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting so a large batch does not hammer the resolver
//! * Consistent timeouts and headers
//! * Streaming audio downloads through [`Fetch`]
//!
//! # Rate Limiting
//!
//! Resolver calls are throttled to 50 calls per 5-second interval, allowing
//! bursts up to that maximum. Requests that would exceed the limit are
//! delayed, not rejected. Audio downloads go to CDN hosts and use the
//! unthrottled client.
//!
//! # Example
//!
//! ```rust
//! use tunefetch::http::Client;
//!
//! let client = Client::new(&config)?;
//! let request = client.get(url);
//! let response = client.execute(request).await?;
//! ```

use std::{future::Future, num::NonZeroU32, time::Duration};

use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt, TryFutureExt, TryStreamExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    self,
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE},
    Body, Method, Url,
};

use crate::{
    config::Config,
    download::{ByteStream, Fetch},
    error::{Error, Result},
};

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Unlimited request client for audio downloads.
    ///
    /// Direct access to underlying client without rate limiting.
    pub unlimited: reqwest::Client,

    /// Rate limiter for resolver calls.
    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window for the rate limit.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(5);

    /// Maximum resolver calls per interval.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 50;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for a connection to be established.
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Duration to wait for individual network reads.
    ///
    /// A stalled audio transfer fails after this long instead of hanging its
    /// worker forever.
    const READ_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built, for example when the
    /// user agent is not a valid header value.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, */*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .default_headers(headers)
            .user_agent(&config.user_agent);

        // Rate limit own requests as to not DoS the resolver.
        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a request with specified method and URL, and an optional body.
    pub fn request<U>(&self, method: Method, url: U, body: Option<Body>) -> reqwest::Request
    where
        U: Into<Url>,
    {
        let mut request = reqwest::Request::new(method, url.into());
        *request.body_mut() = body;
        request
    }

    /// Builds a POST request.
    pub fn post<U, T>(&self, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        self.request(Method::POST, url, Some(body.into()))
    }

    /// Builds a GET request without a body.
    pub fn get<U>(&self, url: U) -> reqwest::Request
    where
        U: Into<Url>,
    {
        self.request(Method::GET, url, None)
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be sent or no response arrives.
    /// A non-success status is *not* an error at this level.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        // No need to await with jitter because the level of concurrency is low.
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }
}

#[async_trait]
impl Fetch for Client {
    async fn fetch(&self, url: &Url) -> Result<ByteStream> {
        let response = self
            .unlimited
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;

        match response.content_length() {
            Some(length) => debug!("fetching {length} bytes from {}", host(url)),
            None => debug!("fetching unknown length from {}", host(url)),
        }

        Ok(response.bytes_stream().map_err(Error::from).boxed())
    }
}

/// Host of `url` for logging, keeping signed query strings out of the logs.
fn host(url: &Url) -> &str {
    url.host_str().unwrap_or("<no host>")
}
