//! Bidirectional byte splicing with a shared idle timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout};
use tracing::trace;

const BUF_SIZE: usize = 16 * 1024;

/// Last time any byte moved in either direction.
struct Activity {
    start: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        self.last_ms
            .store(self.start.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.start.elapsed().saturating_sub(last)
    }
}

/// Pipe bytes both ways between `client` and `server` until both sides
/// reach EOF, either side errors, or no byte moves in either direction for
/// `idle`.
///
/// EOF on one side shuts down the write half of the other. Returns
/// `(client_to_server, server_to_client)` byte counts.
pub async fn splice<C, S>(client: C, server: S, idle: Duration) -> io::Result<(u64, u64)>
where
    C: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = io::split(client);
    let (mut server_read, mut server_write) = io::split(server);
    let activity = Activity::new();

    let up = pipe(&mut client_read, &mut server_write, &activity, idle, "up");
    let down = pipe(&mut server_read, &mut client_write, &activity, idle, "down");

    tokio::try_join!(up, down)
}

async fn pipe<R, W>(
    reader: &mut R,
    writer: &mut W,
    activity: &Activity,
    idle: Duration,
    direction: &'static str,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;

    loop {
        let wait = idle.saturating_sub(activity.idle_for());
        let n = match timeout(wait, reader.read(&mut buf)).await {
            Ok(read) => read?,
            // The other direction may still be busy
            Err(_) if activity.idle_for() < idle => continue,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("tunnel idle for {}s", idle.as_secs()),
                ));
            }
        };

        if n == 0 {
            trace!(direction, total, "tunnel half closed");
            writer.shutdown().await.ok();
            return Ok(total);
        }

        activity.touch();
        match timeout(idle, writer.write_all(&buf[..n])).await {
            Ok(written) => written?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "tunnel write stalled",
                ));
            }
        }
        activity.touch();
        total += n as u64;
    }
}
