use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

/// Errors surfaced by the media proxy and the tunnel proxy.
#[derive(Error, Debug)]
pub enum StreamgateError {
    /// Missing or malformed request parameter
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Target URL is not something we are willing to fetch
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Network failure while talking to the proxied target
    #[error("Upstream fetch failed: {0}")]
    UpstreamFetch(#[from] reqwest::Error),

    /// Proxied target answered with a non-2xx status
    #[error("Upstream returned {status} for {url}")]
    UpstreamStatus { status: u16, url: String },

    /// CONNECT destination unreachable
    #[error("Tunnel connect to {target} failed: {source}")]
    TunnelConnect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] axum::http::Error),
}

pub type Result<T> = std::result::Result<T, StreamgateError>;

impl StreamgateError {
    /// HTTP status this error maps to at the request boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            StreamgateError::BadRequest(_) | StreamgateError::InvalidTarget(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StreamgateError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Rejected request: {}", self);
        }

        (status, format!("Error: {}\n", self)).into_response()
    }
}
