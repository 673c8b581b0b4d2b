//! Adaptive per-model pacing for the recognition endpoint.
//!
//! The endpoint reports remaining quota in `x-ratelimit-*` headers. When a
//! model's quota is exhausted, or after a 429, the next call to that model
//! waits. This delays calls; it never repeats one.

use dashmap::DashMap;
use reqwest::header::HeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest backoff applied after repeated 429s.
const MAX_BACKOFF_SECS: f64 = 60.0;

/// Longest quota reset honored from a response header.
const MAX_RESET_SECS: f64 = 300.0;

/// Rate limit state for a single model.
#[derive(Debug, Default)]
pub struct ModelRateLimitState {
    pub remaining_requests: Option<u32>,
    pub remaining_tokens: Option<u32>,
    pub reset_requests_at: Option<Instant>,
    pub reset_tokens_at: Option<Instant>,
    /// Consecutive 429 responses
    pub consecutive_429s: u32,
    pub backoff_until: Option<Instant>,
}

impl ModelRateLimitState {
    /// Time to wait before the next request may be sent.
    pub fn wait_time(&self) -> Duration {
        let now = Instant::now();
        let mut max_wait = Duration::ZERO;

        if let Some(until) = self.backoff_until.filter(|&t| t > now) {
            max_wait = max_wait.max(until - now);
        }

        for (remaining, reset_at) in [
            (self.remaining_requests, self.reset_requests_at),
            (self.remaining_tokens, self.reset_tokens_at),
        ] {
            if remaining == Some(0) {
                if let Some(reset_at) = reset_at.filter(|&t| t > now) {
                    max_wait = max_wait.max(reset_at - now);
                }
            }
        }

        max_wait
    }

    /// Record a 429 and extend the backoff exponentially.
    pub fn record_429(&mut self) {
        self.consecutive_429s = self.consecutive_429s.saturating_add(1);
        let backoff_secs = 2.0_f64
            .powi(self.consecutive_429s as i32)
            .min(MAX_BACKOFF_SECS);
        self.backoff_until = deadline(Instant::now(), backoff_secs);
        warn!(
            consecutive_429s = self.consecutive_429s,
            backoff_secs = backoff_secs,
            "Rate limited (429), pacing further calls"
        );
    }

    pub fn record_success(&mut self) {
        if self.consecutive_429s > 0 {
            self.consecutive_429s = 0;
            self.backoff_until = None;
        }
    }

    /// Update quota state from response headers.
    pub fn update_from_headers(&mut self, headers: &HeaderMap) {
        let now = Instant::now();

        if let Some(s) = header(headers, "x-ratelimit-remaining-requests") {
            self.remaining_requests = s.parse().ok();
        }
        if let Some(s) = header(headers, "x-ratelimit-remaining-tokens") {
            self.remaining_tokens = s.parse().ok();
        }
        if let Some(secs) = header_secs(headers, "x-ratelimit-reset-requests") {
            self.reset_requests_at = deadline(now, secs);
        }
        if let Some(secs) = header_secs(headers, "x-ratelimit-reset-tokens") {
            self.reset_tokens_at = deadline(now, secs);
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, key: &str) -> Option<&'a str> {
    headers.get(key)?.to_str().ok()
}

fn header_secs(headers: &HeaderMap, key: &str) -> Option<f64> {
    header(headers, key)?
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite())
        .map(|secs| secs.clamp(0.0, MAX_RESET_SECS))
}

fn deadline(now: Instant, secs: f64) -> Option<Instant> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .and_then(|d| now.checked_add(d))
}

/// Per-model pacing shared by every unit using one client.
#[derive(Debug, Default)]
pub struct RateLimiter {
    states: DashMap<String, ModelRateLimitState>,
    total_requests: AtomicU64,
    total_429s: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait if the model's quota requires it. Returns the time waited.
    pub async fn wait_if_needed(&self, model: &str) -> Duration {
        let wait_time = self
            .states
            .get(model)
            .map(|state| state.wait_time())
            .unwrap_or(Duration::ZERO);

        if wait_time > Duration::ZERO {
            debug!(
                model = model,
                wait_ms = wait_time.as_millis() as u64,
                "Waiting for rate limit"
            );
            self.total_wait_ms
                .fetch_add(wait_time.as_millis() as u64, Ordering::Relaxed);
            tokio::time::sleep(wait_time).await;
        }

        wait_time
    }

    /// Record the status and headers of a completed request.
    pub fn record_request(&self, model: &str, status: u16, headers: &HeaderMap) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut state = self.states.entry(model.to_string()).or_default();
        state.update_from_headers(headers);

        if status == 429 {
            self.total_429s.fetch_add(1, Ordering::Relaxed);
            state.record_429();
        } else if status < 400 {
            state.record_success();
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_429s: self.total_429s.load(Ordering::Relaxed),
            total_wait_secs: self.total_wait_ms.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub total_429s: u64,
    pub total_wait_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_exhausted_quota_requires_wait() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining-requests", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset-requests", HeaderValue::from_static("30"));

        let mut state = ModelRateLimitState::default();
        state.update_from_headers(&headers);

        assert_eq!(state.remaining_requests, Some(0));
        assert!(state.wait_time() > Duration::from_secs(25));
    }

    #[test]
    fn test_remaining_quota_needs_no_wait() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining-requests", HeaderValue::from_static("12"));
        headers.insert("x-ratelimit-reset-requests", HeaderValue::from_static("30"));

        let mut state = ModelRateLimitState::default();
        state.update_from_headers(&headers);
        assert_eq!(state.wait_time(), Duration::ZERO);
    }

    #[test]
    fn test_429_backs_off_until_success() {
        let limiter = RateLimiter::new();
        let headers = HeaderMap::new();

        limiter.record_request("m", 429, &headers);
        let wait = limiter.states.get("m").unwrap().wait_time();
        assert!(wait > Duration::from_secs(1));

        limiter.record_request("m", 200, &headers);
        assert_eq!(limiter.states.get("m").unwrap().wait_time(), Duration::ZERO);

        let stats = limiter.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.total_429s, 1);
    }

    #[test]
    fn test_huge_reset_header_is_clamped() {
        let limiter = RateLimiter::new();
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining-requests", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset-requests", HeaderValue::from_static("1e30"));
        headers.insert("x-ratelimit-reset-tokens", HeaderValue::from_static("1e300"));

        limiter.record_request("m", 200, &headers);

        let wait = limiter.states.get("m").unwrap().wait_time();
        assert!(wait > Duration::from_secs(250));
        assert!(wait <= Duration::from_secs_f64(MAX_RESET_SECS));
    }

    #[tokio::test]
    async fn test_unknown_model_does_not_wait() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.wait_if_needed("fresh").await, Duration::ZERO);
    }
}
