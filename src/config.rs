use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Media proxy listen port
    pub port: u16,
    /// Tunnel proxy listen port
    pub tunnel_port: u16,
    /// Listen address shared by both listeners
    pub bind_addr: String,
    /// Public base URL used when rewriting playlist references (no trailing slash)
    pub base_url: String,
    pub is_dev: bool,
    /// Allow the media proxy to fetch loopback/private targets
    pub allow_private_targets: bool,
    /// Per-IP requests per minute on the media proxy (0 = disabled)
    pub rate_limit_rpm: u32,
    /// Upstream TCP/TLS connect timeout
    pub upstream_connect_timeout_secs: u64,
    /// Upstream per-read idle timeout
    pub upstream_idle_timeout_secs: u64,
    /// Tunnel idle timeout, shared by both directions and the request-head read
    pub tunnel_idle_timeout_secs: u64,
    /// Install the Prometheus recorder and serve `/metrics`
    pub metrics_enabled: bool,
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode, provides sensible defaults. In PROD mode, PORT and BASE_URL are required.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        // Port: required in prod, defaults to 3004 in dev
        let port: u16 = if is_dev {
            env::var("PORT")
                .unwrap_or_else(|_| "3004".to_string())
                .parse()?
        } else {
            env::var("PORT")
                .map_err(|_| "PORT is required in production")?
                .parse()?
        };

        let tunnel_port = env::var("TUNNEL_PORT")
            .unwrap_or_else(|_| "3007".to_string())
            .parse()?;

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string());

        // Base URL: required in prod, defaults to localhost in dev
        let base_url = if is_dev {
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://localhost:{}", port))
        } else {
            env::var("BASE_URL").map_err(|_| "BASE_URL is required in production")?
        };
        let base_url = base_url.trim_end_matches('/').to_string();

        // Private targets are allowed in dev so local origins work out of the box
        let allow_private_targets = env::var("ALLOW_PRIVATE_TARGETS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(is_dev);

        let rate_limit_rpm = env::var("RATE_LIMIT_RPM")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .unwrap_or(0);

        let upstream_connect_timeout_secs = timeout_secs("UPSTREAM_CONNECT_TIMEOUT_SECS", 10)?;
        let upstream_idle_timeout_secs = timeout_secs("UPSTREAM_IDLE_TIMEOUT_SECS", 30)?;
        let tunnel_idle_timeout_secs = timeout_secs("TUNNEL_IDLE_TIMEOUT_SECS", 300)?;

        let metrics_enabled = env::var("METRICS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);

        Ok(Config {
            port,
            tunnel_port,
            bind_addr,
            base_url,
            is_dev,
            allow_private_targets,
            rate_limit_rpm,
            upstream_connect_timeout_secs,
            upstream_idle_timeout_secs,
            tunnel_idle_timeout_secs,
            metrics_enabled,
        })
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout_secs)
    }

    pub fn upstream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_idle_timeout_secs)
    }

    pub fn tunnel_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.tunnel_idle_timeout_secs)
    }
}

/// Read a timeout in seconds, rejecting zero.
fn timeout_secs(var: &str, default: u64) -> Result<u64, Box<dyn std::error::Error>> {
    let secs = env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default);
    if secs == 0 {
        return Err(format!("{} must be greater than 0", var).into());
    }
    Ok(secs)
}
