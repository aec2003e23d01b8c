use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};

/// Wraps one side of a connection so that every read and write fails with
/// `TimedOut` once an absolute deadline has passed.
///
/// The deadline is fixed at construction and is not pushed back by traffic.
/// A pending read or write is woken when the deadline fires, so a peer that
/// stays silent cannot hold the session open past it. Each wrapper owns its
/// own timer: wrap the read and write halves separately when they are driven
/// from different tasks.
pub struct Deadline<T> {
    inner: T,
    expiry: Pin<Box<Sleep>>,
}

impl<T> Deadline<T> {
    pub fn new(inner: T, deadline: Instant) -> Self {
        Self {
            inner,
            expiry: Box::pin(tokio::time::sleep_until(deadline)),
        }
    }

    fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.expiry.is_elapsed() || self.expiry.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "session deadline exceeded",
            )));
        }
        Poll::Pending
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Deadline<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Poll::Ready(expired) = this.poll_expired(cx) {
            return Poll::Ready(expired);
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Deadline<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Poll::Ready(Err(e)) = this.poll_expired(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Poll::Ready(expired) = this.poll_expired(cx) {
            return Poll::Ready(expired);
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    // Closing is still attempted after the deadline, but a close that cannot
    // complete (peer not reading our close_notify) gives up once it has passed.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_shutdown(cx) {
            Poll::Ready(result) => Poll::Ready(result),
            Poll::Pending => this.poll_expired(cx),
        }
    }
}
