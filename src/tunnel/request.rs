use std::fmt;
use std::str::FromStr;

use axum::http::{Method, uri::Authority};
use tokio::io::AsyncRead;

use super::prebuffered::Prebuffered;
use crate::error::StreamgateError;

/// Upper bound for a request line plus header section.
pub const MAX_HEAD_LEN: usize = 64 * 1024;

const MAX_HEADERS: usize = 100;

/// Port used when a CONNECT target omits one.
pub const DEFAULT_CONNECT_PORT: u16 = 443;

/// Request line of an inbound tunnel-listener request.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Raw request target (authority-form for CONNECT)
    pub target: String,
}

impl RequestHead {
    /// Parse a request head from `buf`, returning `None` while incomplete.
    ///
    /// On success also returns the length of the head section.
    pub fn parse(buf: &[u8]) -> Result<Option<(usize, Self)>, StreamgateError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        let status = req
            .parse(buf)
            .map_err(|e| StreamgateError::BadRequest(format!("Invalid HTTP request: {e}")))?;

        let httparse::Status::Complete(len) = status else {
            return Ok(None);
        };

        let method = req
            .method
            .ok_or_else(|| StreamgateError::BadRequest("Missing HTTP method".into()))?;
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|e| StreamgateError::BadRequest(format!("Invalid HTTP method: {e}")))?;
        let target = req
            .path
            .ok_or_else(|| StreamgateError::BadRequest("Missing request target".into()))?
            .to_string();

        Ok(Some((len, Self { method, target })))
    }

    /// Buffer from `reader` until a full head is available, without consuming it.
    ///
    /// Returns `Ok(None)` if the peer closed before sending anything.
    pub(crate) async fn peek<R: AsyncRead + Unpin>(
        reader: &mut Prebuffered<R>,
    ) -> Result<Option<(usize, Self)>, StreamgateError> {
        loop {
            if let Some(parsed) = Self::parse(reader.buffer())? {
                return Ok(Some(parsed));
            }
            if reader.is_full() {
                return Err(StreamgateError::BadRequest(
                    "Request head exceeds buffer limit".into(),
                ));
            }
            if reader.buffer_more().await? == 0 {
                if reader.buffer().is_empty() {
                    return Ok(None);
                }
                return Err(StreamgateError::BadRequest(
                    "Connection closed mid request head".into(),
                ));
            }
        }
    }

    pub fn is_connect(&self) -> bool {
        self.method == Method::CONNECT
    }
}

/// Destination of a CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Hostname or IP literal, IPv6 without brackets
    pub host: String,
    pub port: u16,
}

impl ConnectTarget {
    /// Parse an authority-form target, defaulting the port to 443.
    pub fn parse(target: &str) -> Result<Self, StreamgateError> {
        let authority = Authority::from_str(target).map_err(|e| {
            StreamgateError::BadRequest(format!("Invalid CONNECT target {target:?}: {e}"))
        })?;

        let host = authority
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        if host.is_empty() {
            return Err(StreamgateError::BadRequest(format!(
                "CONNECT target {target:?} has no host"
            )));
        }

        let after_host = authority.as_str().rsplit('@').next().unwrap_or_default();
        let after_host = after_host
            .rsplit_once(']')
            .map_or(after_host, |(_, rest)| rest);
        let port = match authority.port_u16() {
            Some(port) => port,
            None if after_host.contains(':') => {
                return Err(StreamgateError::BadRequest(format!(
                    "CONNECT target {target:?} has an invalid port"
                )));
            }
            None => DEFAULT_CONNECT_PORT,
        };

        Ok(Self { host, port })
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
