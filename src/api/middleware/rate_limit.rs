//! Per-client rate limiting for the shorten and redirect routes.

use axum::{
    extract::{ConnectInfo, Path, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use governor::{
    DefaultKeyedRateLimiter, RateLimiter,
    clock::{Clock, DefaultClock},
};
use metrics::counter;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::application::queue::{quota, retry_after_secs};
use crate::config::Config;
use crate::error::AppError;
use crate::state::AppState;

/// Token bucket per key, all sharing one quota.
pub struct KeyedLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    message: &'static str,
}

impl KeyedLimiter {
    pub fn new(max: u32, period: Duration, message: &'static str) -> Self {
        Self {
            limiter: RateLimiter::keyed(quota(max, period)),
            message,
        }
    }

    /// Takes one unit of quota for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::RateLimited`] with the seconds until the key may retry.
    pub fn check(&self, key: &str) -> Result<(), AppError> {
        self.limiter.check_key(&key.to_string()).map_err(|not_until| {
            let retry_after =
                retry_after_secs(not_until.wait_time_from(DefaultClock::default().now()));
            counter!("rate_limited_total").increment(1);
            debug!(key, retry_after, "Rate limited");
            AppError::rate_limited(self.message, retry_after)
        })
    }

    /// Drops buckets that have fully refilled.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    pub fn len(&self) -> usize {
        self.limiter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiter.is_empty()
    }
}

/// Independent quotas for the two public write/read paths.
pub struct RateLimits {
    /// Keyed `shorten-{ip}`, per minute.
    pub shorten: KeyedLimiter,
    /// Keyed `redirect-{ip}-{code}`, per 30 seconds.
    pub redirect: KeyedLimiter,
    pub behind_proxy: bool,
}

impl RateLimits {
    pub fn new(shorten_per_minute: u32, redirect_per_30s: u32, behind_proxy: bool) -> Self {
        Self {
            shorten: KeyedLimiter::new(
                shorten_per_minute,
                Duration::from_secs(60),
                "You have exceeded the URL shortening limit. Please try again in a minute.",
            ),
            redirect: KeyedLimiter::new(
                redirect_per_30s,
                Duration::from_secs(30),
                "You have exceeded the redirect limit for this URL. Please wait a moment.",
            ),
            behind_proxy,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.shorten_rate_limit,
            config.redirect_rate_limit,
            config.behind_proxy,
        )
    }

    pub fn retain_recent(&self) {
        self.shorten.retain_recent();
        self.redirect.retain_recent();
    }
}

/// Client address used in rate limit keys.
///
/// Forwarding headers are trusted only when `behind_proxy` is set.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, behind_proxy: bool) -> String {
    if behind_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        if let Some(ip) = forwarded.or(real_ip) {
            return ip.to_string();
        }
        warn!("BEHIND_PROXY is set but no forwarding header was found");
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn peer_of(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Limits `POST /api/shorten` per client.
pub async fn shorten_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let limits = &state.rate_limits;
    let ip = client_ip(request.headers(), peer_of(&request), limits.behind_proxy);

    limits.shorten.check(&format!("shorten-{}", ip))?;
    Ok(next.run(request).await)
}

/// Limits `GET /{code}` per client and code.
///
/// Codes containing `.` are not counted; the handler rejects them.
pub async fn redirect_limit(
    State(state): State<AppState>,
    Path(code): Path<String>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !code.contains('.') {
        let limits = &state.rate_limits;
        let ip = client_ip(request.headers(), peer_of(&request), limits.behind_proxy);
        limits.redirect.check(&format!("redirect-{}-{}", ip, code))?;
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_keys_are_independent() {
        let limiter = KeyedLimiter::new(2, Duration::from_secs(60), "slow down");

        assert!(limiter.check("shorten-1.1.1.1").is_ok());
        assert!(limiter.check("shorten-1.1.1.1").is_ok());
        assert!(limiter.check("shorten-1.1.1.1").is_err());
        assert!(limiter.check("shorten-2.2.2.2").is_ok());
    }

    #[test]
    fn test_rejection_carries_retry_after() {
        let limiter = KeyedLimiter::new(1, Duration::from_secs(60), "slow down");
        limiter.check("k").unwrap();

        match limiter.check("k").unwrap_err() {
            AppError::RateLimited {
                message,
                retry_after,
            } => {
                assert_eq!(message, "slow down");
                assert!((1..=60).contains(&retry_after));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_client_ip_from_peer() {
        let peer: SocketAddr = "10.0.0.1:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));

        assert_eq!(client_ip(&headers, Some(peer), false), "10.0.0.1");
        assert_eq!(client_ip(&HeaderMap::new(), None, false), "unknown");
    }

    #[test]
    fn test_client_ip_behind_proxy() {
        let peer: SocketAddr = "10.0.0.1:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.2"),
        );
        assert_eq!(client_ip(&headers, Some(peer), true), "203.0.113.7");

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(client_ip(&headers, Some(peer), true), "198.51.100.4");

        assert_eq!(client_ip(&HeaderMap::new(), Some(peer), true), "10.0.0.1");
    }
}
