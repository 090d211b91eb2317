//! Rate limiting middleware using a sliding window.
//!
//! Buckets are keyed by client IP and tier, so the account endpoints and the
//! other form submissions are throttled independently.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    /// Sign-in, sign-up, password reset and OAuth
    Auth,
    /// Contact, expenses and brand writes
    Forms,
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    tokens: u32,
    window_start: Instant,
    last_request: Instant,
}

impl RateLimitEntry {
    fn new(max_tokens: u32) -> Self {
        let now = Instant::now();
        Self {
            tokens: max_tokens,
            window_start: now,
            last_request: now,
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    entries: DashMap<(IpAddr, RateLimitTier), RateLimitEntry>,
    config: RateLimitConfig,
    window_duration: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: DashMap::new(),
            window_duration: Duration::from_secs(config.window_seconds),
            config,
        }
    }

    /// Consume a token for the request.
    /// Returns the bucket state if allowed, or the seconds to wait if limited.
    pub fn check_rate_limit(&self, ip: IpAddr, tier: RateLimitTier) -> Result<RateLimitInfo, u64> {
        if !self.config.enabled {
            return Ok(RateLimitInfo {
                remaining: u32::MAX,
                limit: u32::MAX,
                reset_after: 0,
            });
        }

        let max_tokens = self.max_tokens(tier);
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry((ip, tier))
            .or_insert_with(|| RateLimitEntry::new(max_tokens));

        let elapsed = now.duration_since(entry.window_start);
        if elapsed >= self.window_duration {
            entry.tokens = max_tokens;
            entry.window_start = now;
        } else {
            // Replenish gradually based on the time since the last request
            let since_last = now.duration_since(entry.last_request);
            let replenish_rate = max_tokens as f64 / self.window_duration.as_secs_f64();
            let replenished = (since_last.as_secs_f64() * replenish_rate) as u32;
            entry.tokens = entry.tokens.saturating_add(replenished).min(max_tokens);
        }
        entry.last_request = now;

        let reset_after = self
            .window_duration
            .saturating_sub(now.duration_since(entry.window_start))
            .as_secs();
        if entry.tokens > 0 {
            entry.tokens -= 1;
            Ok(RateLimitInfo {
                remaining: entry.tokens,
                limit: max_tokens,
                reset_after,
            })
        } else {
            Err(reset_after.max(1))
        }
    }

    pub fn max_tokens(&self, tier: RateLimitTier) -> u32 {
        match tier {
            RateLimitTier::Auth => self.config.auth_requests_per_window,
            RateLimitTier::Forms => self.config.form_requests_per_window,
        }
    }

    /// Drop buckets idle for more than two windows
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let expiry = self.window_duration * 2;
        self.entries
            .retain(|_, entry| now.duration_since(entry.window_start) < expiry);
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub remaining: u32,
    pub limit: u32,
    /// Seconds until the window resets
    pub reset_after: u64,
}

fn peer_ip(request: &Request<Body>) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Client IP. Proxy headers count only when `trust_proxy_headers` is set.
fn extract_client_ip(request: &Request<Body>, trust_proxy_headers: bool) -> IpAddr {
    if !trust_proxy_headers {
        return peer_ip(request);
    }
    let headers = request.headers();
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
    if let Some(ip) = forwarded {
        return ip;
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
    real_ip.unwrap_or_else(|| peer_ip(request))
}

pub async fn rate_limit_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    rate_limit_with_tier(state, request, next, RateLimitTier::Auth).await
}

pub async fn rate_limit_forms(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    rate_limit_with_tier(state, request, next, RateLimitTier::Forms).await
}

fn header(value: impl ToString) -> HeaderValue {
    // Decimal digits are always a valid header value
    HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

async fn rate_limit_with_tier(
    state: Arc<AppState>,
    request: Request<Body>,
    next: Next,
    tier: RateLimitTier,
) -> Response {
    let ip = extract_client_ip(&request, state.config.rate_limit.trust_proxy_headers);

    match state.rate_limiter.check_rate_limit(ip, tier) {
        Ok(info) => {
            let mut response = next.run(request).await;
            if info.limit != u32::MAX {
                let headers = response.headers_mut();
                headers.insert("X-RateLimit-Limit", header(info.limit));
                headers.insert("X-RateLimit-Remaining", header(info.remaining));
                headers.insert("X-RateLimit-Reset", header(info.reset_after));
            }
            response
        }
        Err(retry_after) => {
            tracing::warn!(%ip, ?tier, "Rate limit exceeded");
            (
                StatusCode::TOO_MANY_REQUESTS,
                [
                    ("Retry-After", retry_after.to_string()),
                    ("X-RateLimit-Limit", state.rate_limiter.max_tokens(tier).to_string()),
                    ("X-RateLimit-Remaining", "0".to_string()),
                    ("X-RateLimit-Reset", retry_after.to_string()),
                ],
                super::ApiError::rate_limited(format!(
                    "Rate limit exceeded. Try again in {} seconds.",
                    retry_after
                )),
            )
                .into_response()
        }
    }
}

/// Spawn a background task to periodically clean up expired rate limit entries
pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            rate_limiter.cleanup_expired();
            tracing::debug!(
                "Rate limiter cleanup complete, {} entries remaining",
                rate_limiter.entry_count()
            );
        }
    });
}
