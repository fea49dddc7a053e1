use crate::{
    error::{Result, StreamgateError},
    hls::{self, PLAYLIST_CONTENT_TYPE},
    metrics,
    server::{
        state::AppState,
        url_validation::{ensure_public_host, parse_target_url},
    },
};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures_util::TryStreamExt;
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Query string of `GET /proxy/m3u8`.
#[derive(Debug, Deserialize)]
pub struct ProxyParams {
    pub url: Option<String>,
}

/// Client request headers relayed to the upstream for binary content.
const FORWARDED_REQUEST_HEADERS: [header::HeaderName; 2] = [header::RANGE, header::IF_RANGE];

/// Upstream response headers relayed to the client for binary content.
const FORWARDED_RESPONSE_HEADERS: [header::HeaderName; 4] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
];

/// Fetch a media URL and either rewrite it (playlist) or stream it through.
///
/// No retry: an upstream failure is reported to the player right away.
pub async fn proxy_media(
    Query(params): Query<ProxyParams>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response> {
    let start = Instant::now();
    let result = relay(&state, params, &headers).await;

    let status = match &result {
        Ok(response) => response.status().as_u16(),
        Err(e) => e.status().as_u16(),
    };
    metrics::record_request("proxy", status);
    metrics::record_duration("proxy", start);

    result
}

async fn relay(state: &AppState, params: ProxyParams, headers: &HeaderMap) -> Result<Response> {
    let raw = params
        .url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| StreamgateError::BadRequest("url parameter is required".into()))?;

    let target = parse_target_url(raw, state.config.allow_private_targets)?;
    if let Some(resolver) = &state.resolver {
        ensure_public_host(resolver, &target).await?;
    }

    info!("Proxying {}", target);

    // A ranged playlist fetch would hand back a fragment we cannot rewrite
    let forward_range = !target.path().to_ascii_lowercase().ends_with(".m3u8");
    let upstream = fetch(state, &target, forward_range.then_some(headers)).await?;

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    if hls::is_playlist(content_type, &target) {
        let upstream = if upstream.status() == StatusCode::PARTIAL_CONTENT {
            // Playlist only recognised by its MIME type; fetch it whole
            debug!("Refetching {} without Range", target);
            fetch(state, &target, None).await?
        } else {
            upstream
        };
        playlist_response(state, upstream).await
    } else {
        passthrough_response(upstream, target)
    }
}

/// GET `target`, relaying the client's range headers when given.
async fn fetch(
    state: &AppState,
    target: &Url,
    client_headers: Option<&HeaderMap>,
) -> Result<reqwest::Response> {
    let mut request = state.http_client.get(target.clone());
    if let Some(headers) = client_headers {
        for name in &FORWARDED_REQUEST_HEADERS {
            if let Some(value) = headers.get(name) {
                request = request.header(name, value.clone());
            }
        }
    }

    let upstream = request.send().await.inspect_err(|_| {
        metrics::record_upstream_error();
    })?;

    let status = upstream.status();
    if !status.is_success() {
        metrics::record_upstream_error();
        return Err(StreamgateError::UpstreamStatus {
            status: status.as_u16(),
            url: target.to_string(),
        });
    }

    Ok(upstream)
}

async fn playlist_response(state: &AppState, upstream: reqwest::Response) -> Result<Response> {
    // Relative references resolve against where the playlist actually lives,
    // which differs from the requested URL after a redirect
    let manifest_url = upstream.url().clone();
    let body = upstream.bytes().await?;

    let rewritten = hls::rewrite_playlist(&body, &manifest_url, &state.config.base_url);
    info!(
        "Rewrote {} playlist {} ({} references)",
        rewritten.kind.as_str(),
        manifest_url,
        rewritten.rewritten
    );
    metrics::record_playlist_rewrite(rewritten.kind.as_str(), rewritten.rewritten);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        rewritten.body,
    )
        .into_response())
}

/// Stream a non-playlist body through without buffering it.
///
/// Once headers are out, an upstream failure can only cut the connection; it
/// is logged and counted here.
fn passthrough_response(upstream: reqwest::Response, target: Url) -> Result<Response> {
    let mut response = Response::builder().status(upstream.status());

    for name in &FORWARDED_RESPONSE_HEADERS {
        if let Some(value) = upstream.headers().get(name) {
            response = response.header(name, value.clone());
        }
    }

    response = response
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"))
        .header(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Range"),
        )
        .header(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static("Content-Length, Content-Range"),
        );

    let stream = upstream.bytes_stream().inspect_err(move |e| {
        warn!("Upstream stream for {} aborted: {}", target, e);
        metrics::record_stream_abort();
    });

    Ok(response.body(Body::from_stream(stream))?)
}
