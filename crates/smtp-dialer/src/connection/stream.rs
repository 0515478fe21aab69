//! Byte-stream connection with an optional deadline.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};

use super::Deadline;

/// Any bidirectional async byte stream a connection can carry.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// A live connection to an SMTP server (or proxy).
///
/// Wraps TCP, TLS, or any in-memory stream. Dropping the connection closes
/// the underlying socket.
pub struct Connection {
    io: Box<dyn AsyncStream>,
    deadline: Deadline,
    timer: Option<(Instant, Pin<Box<Sleep>>)>,
    tls: bool,
}

impl Connection {
    /// Creates a plaintext connection with an unarmed deadline.
    pub fn new(io: impl AsyncStream + 'static) -> Self {
        Self::with_deadline(io, Deadline::new())
    }

    /// Creates a plaintext connection sharing an existing deadline.
    pub fn with_deadline(io: impl AsyncStream + 'static, deadline: Deadline) -> Self {
        Self {
            io: Box::new(io),
            deadline,
            timer: None,
            tls: false,
        }
    }

    /// Creates a TLS connection sharing the deadline of the stream it wraps.
    pub fn tls(io: impl AsyncStream + 'static, deadline: Deadline) -> Self {
        Self {
            tls: true,
            ..Self::with_deadline(io, deadline)
        }
    }

    /// Returns a handle to this connection's deadline.
    #[must_use]
    pub fn deadline(&self) -> Deadline {
        self.deadline.clone()
    }

    /// Arms (or with `None`, disarms) the I/O deadline.
    ///
    /// # Errors
    ///
    /// Returns an error if the deadline could not be updated.
    pub fn set_deadline(&self, at: Option<Instant>) -> io::Result<()> {
        self.deadline.set(at)
    }

    /// Disarms the I/O deadline.
    ///
    /// # Errors
    ///
    /// Returns an error if the deadline could not be updated.
    pub fn clear_deadline(&self) -> io::Result<()> {
        self.deadline.clear()
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.tls
    }

    fn poll_deadline(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        let Some(at) = self.deadline.get() else {
            self.timer = None;
            return Ok(());
        };

        if Instant::now() >= at {
            return Err(deadline_exceeded());
        }

        if !matches!(&self.timer, Some((armed, _)) if *armed == at) {
            self.timer = Some((at, Box::pin(tokio::time::sleep_until(at))));
        }

        // Polling registers the waker so a stalled read is woken at the deadline.
        if let Some((_, sleep)) = &mut self.timer
            && sleep.as_mut().poll(cx).is_ready()
        {
            return Err(deadline_exceeded());
        }
        Ok(())
    }
}

fn deadline_exceeded() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "i/o deadline exceeded")
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("tls", &self.tls)
            .field("deadline", &self.deadline.get())
            .finish_non_exhaustive()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.poll_deadline(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(e) = this.poll_deadline(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.poll_deadline(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test(start_paused = true)]
    async fn read_fails_once_deadline_passes() {
        let (client, _server) = tokio::io::duplex(64);
        let mut conn = Connection::new(client);
        conn.set_deadline(Some(Instant::now() + Duration::from_secs(5)))
            .unwrap();

        let mut buf = [0u8; 8];
        let err = conn.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_deadline_does_not_fire() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut conn = Connection::new(client);
        let handle = conn.deadline();
        handle
            .set(Some(Instant::now() + Duration::from_millis(10)))
            .unwrap();
        conn.clear_deadline().unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        server.write_all(b"220 ready\r\n").await.unwrap();

        let mut buf = [0u8; 11];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"220 ready\r\n");
    }

    #[tokio::test]
    async fn expired_deadline_rejects_writes() {
        let (client, _server) = tokio::io::duplex(64);
        let mut conn = Connection::new(client);
        conn.set_deadline(Some(Instant::now())).unwrap();

        let err = conn.write_all(b"QUIT\r\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn tls_flag_and_shared_deadline() {
        let (client, _server) = tokio::io::duplex(8);
        let plain = Connection::new(client);
        assert!(!plain.is_tls());

        let deadline = plain.deadline();
        let wrapped = Connection::tls(plain, deadline.clone());
        assert!(wrapped.is_tls());

        let at = Instant::now();
        deadline.set(Some(at)).unwrap();
        assert_eq!(wrapped.deadline().get(), Some(at));
    }
}
