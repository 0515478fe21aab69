//! Authenticated sessions and message delivery.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::dialer::Dialer;
use crate::error::{Error, Result};
use crate::protocol::SmtpClient;

/// Something that can write a serialized message body.
#[async_trait]
pub trait WriteTo: Send + Sync {
    /// Writes the body into `w`, returning the number of bytes written.
    async fn write_to(&self, w: &mut (dyn AsyncWrite + Unpin + Send)) -> io::Result<u64>;
}

#[async_trait]
impl<T: AsRef<[u8]> + Send + Sync + ?Sized> WriteTo for T {
    async fn write_to(&self, w: &mut (dyn AsyncWrite + Unpin + Send)) -> io::Result<u64> {
        let bytes = self.as_ref();
        w.write_all(bytes).await?;
        Ok(bytes.len() as u64)
    }
}

/// A message ready to send: envelope plus serialized body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    from: String,
    to: Vec<String>,
    body: Vec<u8>,
}

impl Message {
    /// Creates a message from an envelope and an RFC 5322 body.
    #[must_use]
    pub fn new<I, S>(from: impl Into<String>, to: I, body: impl Into<Vec<u8>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            from: from.into(),
            to: to.into_iter().map(Into::into).collect(),
            body: body.into(),
        }
    }

    /// Envelope sender.
    #[must_use]
    pub fn from(&self) -> &str {
        &self.from
    }

    /// Envelope recipients, in order.
    #[must_use]
    pub fn to(&self) -> &[String] {
        &self.to
    }

    /// Serialized message.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Sends messages and closes the underlying connection.
#[async_trait]
pub trait SendCloser: Send {
    /// Delivers one message to `to`.
    async fn send(&mut self, from: &str, to: &[&str], body: &dyn WriteTo) -> Result<()>;

    /// Ends the session.
    async fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Sends `messages` through `sender` in order, stopping at the first failure.
///
/// # Errors
///
/// Returns the first send error.
pub async fn send<S: SendCloser + ?Sized>(sender: &mut S, messages: &[Message]) -> Result<()> {
    for message in messages {
        let to: Vec<&str> = message.to.iter().map(String::as_str).collect();
        sender.send(&message.from, &to, &message.body).await?;
    }
    Ok(())
}

/// An authenticated connection created by [`Dialer::dial`].
///
/// Dropping a session closes its socket without QUIT; use
/// [`SendCloser::close`] to end it politely.
pub struct Session<'d> {
    client: Box<dyn SmtpClient>,
    dialer: &'d Dialer,
}

impl<'d> Session<'d> {
    pub(crate) fn new(client: Box<dyn SmtpClient>, dialer: &'d Dialer) -> Self {
        Self { client, dialer }
    }

    /// The dialer this session reconnects through.
    #[must_use]
    pub const fn dialer(&self) -> &'d Dialer {
        self.dialer
    }

    async fn transaction(&mut self, from: &str, to: &[&str], body: &dyn WriteTo) -> Result<()> {
        for rcpt in to {
            self.client.rcpt(rcpt).await?;
        }

        let mut sink = self.client.data().await?;
        if let Err(e) = body.write_to(&mut sink).await {
            let _ = sink.close().await;
            return Err(Error::Io(e));
        }
        sink.close().await
    }
}

#[async_trait]
impl<'d> SendCloser for Session<'d> {
    async fn send(&mut self, from: &str, to: &[&str], body: &dyn WriteTo) -> Result<()> {
        if let Err(err) = self.client.mail(from).await {
            if !err.is_eof() {
                return Err(err);
            }

            let host = self.dialer.host();
            tracing::info!(host, "server closed the connection, reconnecting");
            match self.dialer.connect().await {
                Ok(client) => {
                    self.client = client;
                    self.client.mail(from).await?;
                }
                Err(redial) => {
                    tracing::warn!(host, error = %redial, "reconnect failed");
                    return Err(err);
                }
            }
        }

        self.transaction(from, to, body).await
    }

    async fn close(mut self) -> Result<()> {
        self.client.quit().await
    }
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.dialer.host())
            .field("port", &self.dialer.port())
            .finish_non_exhaustive()
    }
}
