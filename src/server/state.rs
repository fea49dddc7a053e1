use crate::{
    config::Config,
    server::{
        rate_limit::RateLimiter,
        url_validation::{DnsResolver, build_resolver},
    },
};
use metrics_exporter_prometheus::PrometheusHandle;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application state shared across all media proxy handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Shared HTTP client for connection pooling
    pub http_client: Client,
    /// Resolver for the private-target check; `None` when private targets are allowed
    pub resolver: Option<Arc<DnsResolver>>,
    /// Per-IP limiter; `None` when `rate_limit_rpm` is 0
    pub rate_limiter: Option<RateLimiter>,
    /// Prometheus handle rendered by `/metrics`
    pub metrics: Option<PrometheusHandle>,
    pub started_at: Instant,
}

impl AppState {
    /// Create a new AppState with the given configuration
    pub fn new(config: Config) -> Result<Self, reqwest::Error> {
        let http_client = upstream_client(&config)?;

        let resolver = (!config.allow_private_targets).then(|| Arc::new(build_resolver()));

        let rate_limiter =
            (config.rate_limit_rpm > 0).then(|| RateLimiter::new(config.rate_limit_rpm));

        let metrics = if config.metrics_enabled {
            crate::metrics::install()
        } else {
            None
        };

        Ok(Self {
            config: Arc::new(config),
            http_client,
            resolver,
            rate_limiter,
            metrics,
            started_at: Instant::now(),
        })
    }
}

/// HTTP client used for upstream fetches.
///
/// No overall request timeout: segment bodies are streamed and may run long.
/// Stalls are bounded by the per-read idle timeout instead.
pub fn upstream_client(config: &Config) -> Result<Client, reqwest::Error> {
    Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .connect_timeout(config.upstream_connect_timeout())
        .read_timeout(config.upstream_idle_timeout())
        .build()
}
