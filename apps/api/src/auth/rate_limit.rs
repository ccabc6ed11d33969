//! Fixed-window rate limiting per client IP.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::config::RateLimitConfig;
use crate::errors::AppError;
use crate::state::AppState;

#[derive(Clone)]
pub struct RateLimiter {
    limit: u32,
    period: Duration,
    trust_proxy: bool,
    windows: Arc<Mutex<HashMap<String, (u32, Instant)>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            limit: config.requests_per_period.max(1),
            period: Duration::from_secs(config.period_secs.max(1)),
            trust_proxy: config.trust_proxy,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Counts one request for `key`; false once the window's limit is spent.
    pub fn check(&self, key: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.retain(|_, (_, started)| now.duration_since(*started) < self.period);

        match windows.get_mut(key) {
            Some((count, _)) if *count >= self.limit => false,
            Some((count, _)) => {
                *count += 1;
                true
            }
            None => {
                windows.insert(key.to_string(), (1, now));
                true
            }
        }
    }
}

pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = client_key(&req, state.rate_limiter.trust_proxy);
    if !state.rate_limiter.check(&key, Instant::now()) {
        warn!(client = %key, "Rate limit exceeded");
        return Err(AppError::TooManyRequests);
    }
    Ok(next.run(req).await)
}

const MAX_FORWARDED_LEN: usize = 64;

/// First `X-Forwarded-For` hop when proxies are trusted and the hop looks like an
/// address, else the peer address.
fn client_key(req: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(forwarded) = forwarded_for(req) {
            return forwarded;
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_for(req: &Request) -> Option<String> {
    let raw = req.headers().get("x-forwarded-for")?.to_str().ok()?;
    let first = raw.split(',').next()?.trim();
    if first.is_empty() || first.len() > MAX_FORWARDED_LEN {
        return None;
    }
    first
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b':' || b == b'-')
        .then(|| first.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn limiter(limit: u32, period_secs: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            requests_per_period: limit,
            period_secs,
            trust_proxy: false,
        })
    }

    fn forwarded(value: &str) -> Request {
        axum::http::Request::builder()
            .header("x-forwarded-for", value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_allows_up_to_limit_then_blocks() {
        let rl = limiter(3, 60);
        let now = Instant::now();
        assert!(rl.check("1.2.3.4", now));
        assert!(rl.check("1.2.3.4", now));
        assert!(rl.check("1.2.3.4", now));
        assert!(!rl.check("1.2.3.4", now));
    }

    #[test]
    fn test_keys_are_independent() {
        let rl = limiter(1, 60);
        let now = Instant::now();
        assert!(rl.check("a", now));
        assert!(rl.check("b", now));
        assert!(!rl.check("a", now));
    }

    #[test]
    fn test_window_resets_after_period() {
        let rl = limiter(1, 10);
        let now = Instant::now();
        assert!(rl.check("a", now));
        assert!(!rl.check("a", now + Duration::from_secs(5)));
        assert!(rl.check("a", now + Duration::from_secs(11)));
    }

    #[test]
    fn test_client_key_prefers_forwarded_header_behind_proxy() {
        let req = forwarded("10.0.0.7, 172.16.0.1");
        assert_eq!(client_key(&req, true), "10.0.0.7");
    }

    #[test]
    fn test_client_key_ignores_forwarded_header_without_proxy() {
        let mut req = forwarded("10.0.0.7");
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        assert_eq!(client_key(&req, false), "192.0.2.1");
    }

    #[test]
    fn test_client_key_rejects_malformed_forwarded_header() {
        assert_eq!(client_key(&forwarded("<script>"), true), "unknown");
        assert_eq!(client_key(&forwarded(&"1".repeat(65)), true), "unknown");
        assert_eq!(client_key(&forwarded(" , 10.0.0.1"), true), "unknown");
    }

    #[test]
    fn test_rotating_forwarded_header_shares_peer_window() {
        let rl = limiter(1, 60);
        let now = Instant::now();
        let peer = SocketAddr::from(([198, 51, 100, 4], 5000));

        let keys: Vec<String> = ["1.1.1.1", "2.2.2.2"]
            .iter()
            .map(|ip| {
                let mut req = forwarded(ip);
                req.extensions_mut().insert(ConnectInfo(peer));
                client_key(&req, false)
            })
            .collect();

        assert!(rl.check(&keys[0], now));
        assert!(!rl.check(&keys[1], now));
    }

    #[test]
    fn test_client_key_without_peer_info() {
        let req = axum::http::Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_key(&req, true), "unknown");
    }
}
