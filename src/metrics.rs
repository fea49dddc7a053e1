//! Prometheus metrics for the media proxy and the tunnel proxy.
//!
//! Recording goes through the `metrics` facade, so calls are no-ops until
//! [`install`] registers the Prometheus recorder.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the global Prometheus recorder (idempotent).
///
/// Returns `None` when another recorder already owns the global slot.
pub fn install() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Prometheus recorder not installed: {}", e);
                None
            }
        })
        .clone()
}

pub fn record_request(route: &'static str, status: u16) {
    counter!("streamgate_requests_total", "route" => route, "status" => status.to_string())
        .increment(1);
}

pub fn record_duration(route: &'static str, start: Instant) {
    histogram!("streamgate_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error() {
    counter!("streamgate_upstream_errors_total").increment(1);
}

/// Upstream body failed after response headers were already sent.
pub fn record_stream_abort() {
    counter!("streamgate_stream_aborts_total").increment(1);
}

pub fn record_playlist_rewrite(kind: &'static str, rewritten_lines: usize) {
    counter!("streamgate_playlists_rewritten_total", "kind" => kind).increment(1);
    counter!("streamgate_playlist_lines_rewritten_total").increment(rewritten_lines as u64);
}

pub fn record_tunnel_opened() {
    counter!("streamgate_tunnels_total").increment(1);
}

pub fn record_tunnel_connect_failure() {
    counter!("streamgate_tunnel_connect_failures_total").increment(1);
}

pub fn record_tunnel_bytes(from_client: u64, from_server: u64) {
    counter!("streamgate_tunnel_bytes_total", "direction" => "upstream").increment(from_client);
    counter!("streamgate_tunnel_bytes_total", "direction" => "downstream").increment(from_server);
}

pub fn record_forward(status: u16) {
    counter!("streamgate_forwarded_requests_total", "status" => status.to_string()).increment(1);
}
