//! A prebuffering wrapper for a client socket.
//!
//! The tunnel listener reads the request head into [`Prebuffered`] to decide
//! between CONNECT and plain HTTP. Reads drain the buffer first and then fall
//! through to the socket, so hyper sees the untouched byte stream; writes go
//! straight to the socket.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

/// Starting size of the head buffer; grows up to `max_len`.
const INITIAL_CAPACITY: usize = 4 * 1024;

/// Client socket with an inspectable read-ahead buffer.
///
/// Bytes pulled in by [`buffer_more`](Self::buffer_more) stay visible through
/// [`buffer`](Self::buffer) until they are read or discarded.
pub(crate) struct Prebuffered<S> {
    inner: S,
    buf: BytesMut,
    max_len: usize,
}

impl<S: AsyncRead + Unpin> Prebuffered<S> {
    /// Wrap `inner`, buffering at most `max_len` bytes ahead.
    pub(crate) fn new(inner: S, max_len: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
            max_len,
        }
    }

    /// Unconsumed buffered bytes.
    pub(crate) fn buffer(&self) -> &[u8] {
        &self.buf[..]
    }

    /// True once the read-ahead limit is reached.
    pub(crate) fn is_full(&self) -> bool {
        self.buf.len() >= self.max_len
    }

    /// Drop `n` bytes from the front of the buffer, clamped to its length.
    pub(crate) fn discard(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        let _ = self.buf.split_to(n);
    }

    /// Read more data from the socket into the buffer, up to `max_len`.
    ///
    /// Returns 0 at EOF.
    pub(crate) async fn buffer_more(&mut self) -> io::Result<usize> {
        let max = self.max_len.saturating_sub(self.buf.len());
        (&mut self.inner)
            .take(max as u64)
            .read_buf(&mut self.buf)
            .await
    }

    /// The wrapped socket, bypassing the buffer.
    pub(crate) fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Split into the still-buffered bytes and the socket.
    pub(crate) fn into_parts(self) -> (Bytes, S) {
        (self.buf.freeze(), self.inner)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Prebuffered<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !out.has_remaining_mut() {
            Poll::Ready(Ok(()))
        } else if !self.buf.is_empty() {
            let n = self.buf.len().min(out.remaining_mut());
            let chunk = self.buf.split_to(n);
            out.put_slice(&chunk);
            Poll::Ready(Ok(()))
        } else {
            Pin::new(&mut self.inner).poll_read(cx, out)
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Prebuffered<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[std::io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
