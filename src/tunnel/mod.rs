//! Forward HTTP proxy with CONNECT tunnelling.
//!
//! Each accepted socket gets its own task. The request head is peeked from a
//! [`Prebuffered`] socket: `CONNECT` is handled by hand so the client sees
//! exactly `HTTP/1.1 200 Connection Established\r\n\r\n`, everything else is
//! handed to hyper with the peeked bytes still in the buffer. hyper answers
//! that one request with `Connection: close`, so a later CONNECT always comes
//! in on a fresh socket and goes through the same path.
//!
//! This is an open relay. Any destination is reachable, so deployments must
//! restrict who can reach the listener at the network level.

pub mod forward;
pub(crate) mod prebuffered;
pub mod request;
pub mod splice;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    error::{Result, StreamgateError},
    metrics,
};
use prebuffered::Prebuffered;
use request::{ConnectTarget, MAX_HEAD_LEN, RequestHead};

/// Written to the client once the destination socket is open.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Shared per-listener state of the tunnel proxy.
#[derive(Clone)]
pub struct TunnelProxy {
    client: reqwest::Client,
    connect_timeout: Duration,
    idle_timeout: Duration,
}

impl TunnelProxy {
    pub fn new(config: &Config) -> std::result::Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.upstream_connect_timeout())
            .read_timeout(config.upstream_idle_timeout())
            .build()?;

        Ok(Self {
            client,
            connect_timeout: config.upstream_connect_timeout(),
            idle_timeout: config.tunnel_idle_timeout(),
        })
    }

    /// Handle one client connection from accept to close.
    pub async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        stream.set_nodelay(true).ok();
        let mut reader = Prebuffered::new(stream, MAX_HEAD_LEN);

        let peeked = timeout(self.idle_timeout, RequestHead::peek(&mut reader)).await;
        let (head_len, head) = match peeked {
            Ok(Ok(Some(parsed))) => parsed,
            Ok(Ok(None)) => {
                debug!(%peer, "Client closed before sending a request");
                return Ok(());
            }
            Ok(Err(e)) => {
                reader.get_mut().write_all(BAD_REQUEST).await.ok();
                return Err(e);
            }
            Err(_) => {
                debug!(
                    %peer,
                    "No complete request head within {}s, closing",
                    self.idle_timeout.as_secs()
                );
                reader.get_mut().shutdown().await.ok();
                return Ok(());
            }
        };

        if !head.is_connect() {
            return self.serve_http(reader, peer).await;
        }

        let target = match ConnectTarget::parse(&head.target) {
            Ok(target) => target,
            Err(e) => {
                reader.get_mut().write_all(BAD_REQUEST).await.ok();
                return Err(e);
            }
        };

        // Bytes after the head belong to the tunnel
        reader.discard(head_len);
        self.tunnel(reader, target, peer).await
    }

    async fn tunnel(
        &self,
        client: Prebuffered<TcpStream>,
        target: ConnectTarget,
        peer: SocketAddr,
    ) -> Result<()> {
        let mut server = match self.connect(&target).await {
            Ok(server) => server,
            Err(e) => {
                let (_, mut client) = client.into_parts();
                client.shutdown().await.ok();
                return Err(e);
            }
        };

        let (head, mut client) = client.into_parts();
        client.write_all(CONNECTION_ESTABLISHED).await?;

        if !head.is_empty() {
            server.write_all(&head).await?;
        }

        metrics::record_tunnel_opened();
        info!(%peer, "Tunnel established to {}", target);

        let (up, down) = splice::splice(client, server, self.idle_timeout).await?;
        let up = up + head.len() as u64;
        metrics::record_tunnel_bytes(up, down);
        info!(%peer, "Tunnel to {} closed: {} bytes up, {} bytes down", target, up, down);

        Ok(())
    }

    async fn connect(&self, target: &ConnectTarget) -> Result<TcpStream> {
        let attempt = timeout(
            self.connect_timeout,
            TcpStream::connect((target.host.as_str(), target.port)),
        )
        .await;

        let source = match attempt {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).ok();
                return Ok(stream);
            }
            Ok(Err(e)) => e,
            Err(_) => std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        };

        metrics::record_tunnel_connect_failure();
        Err(StreamgateError::TunnelConnect {
            target: target.to_string(),
            source,
        })
    }

    async fn serve_http(&self, reader: Prebuffered<TcpStream>, peer: SocketAddr) -> Result<()> {
        let io = TokioIo::new(reader);
        let client = self.client.clone();
        let service = service_fn(move |req| {
            let client = client.clone();
            async move { Ok::<_, Infallible>(forward::forward(&client, req).await) }
        });

        if let Err(e) = http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .keep_alive(false)
            .timer(TokioTimer::new())
            .header_read_timeout(self.idle_timeout)
            .serve_connection(io, service)
            .await
        {
            debug!(%peer, "HTTP connection ended with error: {}", e);
        }

        Ok(())
    }
}

/// Accept tunnel-proxy connections until `shutdown` fires.
pub async fn serve(listener: TcpListener, proxy: TunnelProxy, shutdown: CancellationToken) {
    let proxy = Arc::new(proxy);

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Tunnel proxy shutting down");
                return;
            }
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                error!("Tunnel accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        let proxy = proxy.clone();
        tokio::spawn(async move {
            if let Err(e) = proxy.handle_connection(stream, peer).await {
                warn!(%peer, "Tunnel connection error: {}", e);
            }
        });
    }
}

/// Bind the tunnel listener and serve until `shutdown` fires.
pub async fn start(config: Config, shutdown: CancellationToken) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.bind_addr, config.tunnel_port);
    let proxy = TunnelProxy::new(&config)?;

    let listener = match TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind tunnel proxy to {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("🔀 Tunnel proxy listening on {}", addr);
    serve(listener, proxy, shutdown).await;

    Ok(())
}
