//! Plain-HTTP forwarding for the tunnel listener.
//!
//! Requests are relayed through reqwest with the `Host` header rewritten to
//! the target. Absolute-form targets are used as-is; origin-form targets are
//! sent to `https://<Host><path>`.

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderValue, Request, Response, StatusCode, Uri,
        header::{self, HeaderName},
    },
};
use hyper::body::{Body as _, Incoming};
use http_body_util::BodyExt;
use tracing::{debug, warn};

use crate::metrics;

/// Headers scoped to a single connection, never relayed.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Work out where a non-CONNECT request should go.
pub fn forward_target(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    if uri.scheme().is_some() {
        return Some(uri.to_string());
    }

    let host = headers.get(header::HOST)?.to_str().ok()?.trim();
    if host.is_empty() {
        return None;
    }
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    Some(format!("https://{host}{path}"))
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Relay one request and stream the upstream response back.
pub async fn forward(client: &reqwest::Client, req: Request<Incoming>) -> Response<Body> {
    let Some(target) = forward_target(req.uri(), req.headers()) else {
        warn!("Forward request without absolute target or Host: {}", req.uri());
        return plain_text(StatusCode::BAD_REQUEST, "Proxy error: missing Host header");
    };

    let (parts, body) = req.into_parts();
    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    // reqwest sets Host from the target URL
    headers.remove(header::HOST);

    debug!("Forwarding {} {}", parts.method, target);

    let mut request = client.request(parts.method, &target).headers(headers);
    if !body.is_end_stream() {
        request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let upstream = match request.send().await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!("Proxy error forwarding to {}: {}", target, e);
            metrics::record_forward(StatusCode::INTERNAL_SERVER_ERROR.as_u16());
            return plain_text(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Proxy error: {}", e),
            );
        }
    };

    let status = upstream.status();
    metrics::record_forward(status.as_u16());

    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

pub fn plain_text(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(message.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
