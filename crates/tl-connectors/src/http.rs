//! Rate-limited HTTP client shared by the feed connectors.
//!
//! Each client carries a governor token bucket sized from the feed's
//! daily quota and a bounded retry loop with jittered exponential
//! backoff for transient failures. Provider rate-limit responses are
//! surfaced as [`FeedError::RateLimited`] so the ingest scheduler can
//! back off without the connector sleeping through its poll slot.

use crate::traits::{FeedConfig, FeedError, FeedResult};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use reqwest::{header::HeaderMap, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const SECONDS_PER_DAY: u64 = 86_400;

/// Type alias for the rate limiter.
type RateLimiterType = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Builds the token-bucket quota for a daily request budget.
///
/// Burst is fixed at 1: permits are spaced `86400 / per_day` seconds
/// apart, so no rolling 24-hour window can ever see more than `per_day`
/// requests. Any larger burst would allow `burst - 1` extra requests in
/// a window straddling the bucket refill.
pub fn quota_per_day(per_day: u32) -> Option<Quota> {
    if per_day == 0 {
        return None;
    }
    let period = Duration::from_secs(SECONDS_PER_DAY) / per_day;
    Quota::with_period(period).map(|q| q.allow_burst(NonZeroU32::MIN))
}

/// HTTP client with a per-feed rate limiter and bounded retries.
pub struct HttpClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<RateLimiterType>,
    max_retries: u32,
}

impl HttpClient {
    /// Creates a client for an unauthenticated feed.
    pub fn new(config: &FeedConfig) -> FeedResult<Self> {
        Self::with_headers(config, HeaderMap::new())
    }

    /// Creates a client with extra default headers (e.g. an API key
    /// header for authenticated feeds).
    pub fn with_headers(config: &FeedConfig, headers: HeaderMap) -> FeedResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| FeedError::config(e.to_string()))?;

        let quota = quota_per_day(config.rate_limit_per_day)
            .ok_or_else(|| FeedError::config("rate_limit_per_day must be at least 1"))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(GovernorRateLimiter::direct(quota)),
            max_retries: config.max_retries,
        })
    }

    /// Builds a full URL from a path.
    pub fn build_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Executes a GET and returns the response body as text.
    pub async fn get_text(&self, path: &str) -> FeedResult<String> {
        let response = self.get(path).await?;
        response
            .text()
            .await
            .map_err(|e| FeedError::invalid_response(e.to_string()))
    }

    /// Executes a GET and deserializes the JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> FeedResult<T> {
        let response = self.get(path).await?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| FeedError::invalid_response(e.to_string()))?;

        serde_json::from_str(&text).map_err(|e| {
            FeedError::invalid_response(format!(
                "failed to parse response (status {}): {} - body: {}",
                status,
                e,
                text.chars().take(200).collect::<String>()
            ))
        })
    }

    /// Executes a GET with rate limiting and retries.
    pub async fn get(&self, path: &str) -> FeedResult<Response> {
        let url = self.build_url(path);

        let mut last_error = None;
        let mut delay = Duration::from_millis(100);

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!(%url, attempt, ?delay, "retrying feed request");
                sleep(delay).await;
                delay = std::cmp::min(delay * 2 + rand_jitter(), Duration::from_secs(30));
            }

            // One token per outbound attempt; retries count against the
            // daily budget too.
            self.rate_limiter.until_ready().await;

            match self.client.get(&url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = response
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        warn!(%url, retry_after, "provider rate limit hit");
                        return Err(FeedError::rate_limited(retry_after));
                    }

                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(FeedError::auth(format!("status {}", status)));
                    }

                    if status.is_server_error() {
                        last_error =
                            Some(FeedError::connection(format!("server error: {}", status)));
                        continue;
                    }

                    if status.is_client_error() {
                        return Err(FeedError::invalid_response(format!(
                            "client error: {}",
                            status
                        )));
                    }

                    return Ok(response);
                }
                Err(e) => {
                    last_error = Some(if e.is_timeout() {
                        FeedError::timeout(e.to_string())
                    } else {
                        FeedError::connection(e.to_string())
                    });
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| FeedError::connection("request failed with no attempts".to_string())))
    }
}

/// Small hash-derived jitter for the backoff schedule.
fn rand_jitter() -> Duration {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::time::Instant::now().hash(&mut hasher);
    Duration::from_millis(hasher.finish() % 100)
}
