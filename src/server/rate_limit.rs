//! Per-IP rate limiting middleware.
//!
//! Sliding-window log using DashMap: each client keeps the timestamps of its
//! requests inside the last window. A background task evicts clients whose
//! newest request has aged out, so the map stays bounded by active clients.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::state::AppState;

/// How often stale clients are evicted.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Per-IP sliding-window rate limiter.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    /// Request timestamps per client, oldest first
    clients: Arc<DashMap<String, VecDeque<Instant>>>,
    /// Max requests per window
    limit: u32,
    /// Window duration
    window: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter with the given requests-per-minute limit.
    pub fn new(requests_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute, Duration::from_secs(60))
    }

    pub fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            limit,
            window,
        }
    }

    /// Check whether a request from `client` is allowed, recording it if so.
    pub fn check(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.clients.entry(client.to_string()).or_default();

        while entry
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
        {
            entry.pop_front();
        }

        if entry.len() >= self.limit as usize {
            return false;
        }

        entry.push_back(now);
        true
    }

    /// Remove clients with no request inside the current window.
    pub fn cleanup(&self) {
        let window = self.window;
        self.clients.retain(|_, stamps| {
            stamps
                .back()
                .is_some_and(|newest| newest.elapsed() < window)
        });
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    /// Run [`cleanup`](Self::cleanup) every `interval` until `shutdown` fires.
    pub fn spawn_cleanup(&self, interval: Duration, shutdown: CancellationToken) {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        limiter.cleanup();
                        debug!("Rate limiter tracking {} clients", limiter.tracked_clients());
                    }
                }
            }
        });
    }
}

/// Extract client IP from X-Forwarded-For, falling back to the peer address.
fn extract_client_ip(req: &Request) -> String {
    // First entry is the original client
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next()
    {
        let ip = first_ip.trim();
        if !ip.is_empty() {
            return ip.to_string();
        }
    }

    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    "unknown".to_string()
}

/// Axum middleware: reject requests exceeding the per-IP rate limit.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(ref limiter) = state.rate_limiter {
        let ip = extract_client_ip(&req);
        if !limiter.check(&ip) {
            warn!("Rate limit exceeded for IP: {}", ip);
            return (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded\n").into_response();
        }
    }

    next.run(req).await
}
