//! The protocol-client seam.
//!
//! [`SmtpClient`] is the minimal set of SMTP operations the dialer and
//! session use. [`ClientFactory`] builds one over a fresh connection, which
//! lets tests drive the dialer with scripted clients.

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::auth::Auth;
use crate::connection::{Client, Connection};
use crate::error::Result;
use crate::tls::TlsConfig;

/// Writable message body opened by [`SmtpClient::data`].
#[async_trait]
pub trait DataSink: AsyncWrite + Unpin + Send {
    /// Terminates the message and waits for the server to accept it.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminator cannot be written or the server
    /// rejects the message.
    async fn close(&mut self) -> Result<()>;
}

/// SMTP operations used to establish a session and deliver messages.
#[async_trait]
pub trait SmtpClient: Send {
    /// Sends EHLO (or HELO) with `local_name`. Must precede other commands.
    async fn hello(&mut self, local_name: &str) -> Result<()>;

    /// Returns the parameters of an advertised extension, if any.
    async fn extension(&mut self, name: &str) -> Result<Option<String>>;

    /// Upgrades the connection with STARTTLS.
    async fn start_tls(&mut self, config: &TlsConfig) -> Result<()>;

    /// Authenticates with `auth`.
    async fn auth(&mut self, auth: &dyn Auth) -> Result<()>;

    /// Starts a transaction with `MAIL FROM`.
    async fn mail(&mut self, from: &str) -> Result<()>;

    /// Adds a recipient with `RCPT TO`.
    async fn rcpt(&mut self, to: &str) -> Result<()>;

    /// Issues `DATA` and returns a sink for the message content.
    async fn data<'a>(&'a mut self) -> Result<Box<dyn DataSink + 'a>>;

    /// Sends `QUIT` and closes the connection.
    async fn quit(&mut self) -> Result<()>;

    /// Closes the connection without `QUIT`.
    async fn close(&mut self) -> Result<()>;
}

/// Creates protocol clients over established connections.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Reads the greeting on `conn` and returns a client for `host`.
    async fn new_client(&self, conn: Connection, host: &str) -> Result<Box<dyn SmtpClient>>;
}

/// The production [`ClientFactory`], building [`Client`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientBuilder;

#[async_trait]
impl ClientFactory for ClientBuilder {
    async fn new_client(&self, conn: Connection, host: &str) -> Result<Box<dyn SmtpClient>> {
        let client = Client::new(conn, host).await?;
        Ok(Box::new(client))
    }
}
