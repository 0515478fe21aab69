//! Dialer configuration and the connection handshake.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;

use crate::auth::{Auth, AuthStrategy};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::protocol::{ClientBuilder, ClientFactory, SmtpClient};
use crate::session::{Message, SendCloser, Session};
use crate::tls::{RustlsWrap, TlsConfig, TlsWrap};
use crate::transport::{self, Dial, TcpDial};

/// Port on which implicit TLS is enabled by default.
pub const SMTPS_PORT: u16 = 465;

/// Deadline covering the TLS handshake and the server greeting.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for an SMTP server; creates [`Session`]s.
///
/// # Example
///
/// ```no_run
/// use smtp_dialer::{Dialer, Message};
///
/// # async fn run() -> smtp_dialer::Result<()> {
/// let dialer = Dialer::new("smtp.example.com", 587, "user@example.com", "secret")
///     .with_local_name("client.example.com");
///
/// let message = Message::new(
///     "user@example.com",
///     ["friend@example.org"],
///     "Subject: Hello\r\n\r\nHi there!\r\n",
/// );
/// dialer.dial_and_send(&[message]).await?;
/// # Ok(())
/// # }
/// ```
pub struct Dialer {
    host: String,
    port: u16,
    username: String,
    password: String,
    auth: OnceLock<AuthStrategy>,
    ssl: bool,
    tls_config: Option<TlsConfig>,
    local_name: Option<String>,
    skip_username_check: bool,
    socks5_proxy: Option<String>,
    net: Arc<dyn Dial>,
    tls: Arc<dyn TlsWrap>,
    clients: Arc<dyn ClientFactory>,
}

impl Dialer {
    /// Creates a dialer. Implicit TLS is enabled when `port` is 465.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            auth: OnceLock::new(),
            ssl: port == SMTPS_PORT,
            tls_config: None,
            local_name: None,
            skip_username_check: false,
            socks5_proxy: None,
            net: Arc::new(TcpDial),
            tls: Arc::new(RustlsWrap),
            clients: Arc::new(ClientBuilder),
        }
    }

    /// Same as [`Dialer::new`].
    #[deprecated(note = "use Dialer::new")]
    #[must_use]
    pub fn new_plain(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(host, port, username, password)
    }

    /// Enables or disables implicit TLS.
    #[must_use]
    pub const fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// Uses `config` for implicit TLS and STARTTLS.
    #[must_use]
    pub fn with_tls_config(mut self, config: TlsConfig) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Sets the identity sent with HELO/EHLO.
    #[must_use]
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    /// Uses `auth` instead of negotiating a mechanism.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthStrategy) -> Self {
        self.auth = OnceLock::from(auth);
        self
    }

    /// Accepts usernames that are not email addresses.
    #[must_use]
    pub const fn with_skip_username_check(mut self, skip: bool) -> Self {
        self.skip_username_check = skip;
        self
    }

    /// Routes connections through the SOCKS5 proxy at `addr` (`host:port`).
    #[must_use]
    pub fn with_socks5_proxy(mut self, addr: impl Into<String>) -> Self {
        self.set_socks5_proxy(addr);
        self
    }

    /// Replaces the dial primitive.
    #[must_use]
    pub fn with_dial(mut self, net: impl Dial + 'static) -> Self {
        self.net = Arc::new(net);
        self
    }

    /// Replaces the TLS-wrap primitive used for implicit TLS.
    #[must_use]
    pub fn with_tls_wrap(mut self, tls: impl TlsWrap + 'static) -> Self {
        self.tls = Arc::new(tls);
        self
    }

    /// Replaces the protocol-client factory.
    #[must_use]
    pub fn with_client_factory(mut self, clients: impl ClientFactory + 'static) -> Self {
        self.clients = Arc::new(clients);
        self
    }

    /// Routes connections through the SOCKS5 proxy at `addr` (`host:port`).
    pub fn set_socks5_proxy(&mut self, addr: impl Into<String>) {
        self.socks5_proxy = Some(addr.into());
    }

    /// Server host name.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Server port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Login username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Whether implicit TLS is used.
    #[must_use]
    pub const fn ssl(&self) -> bool {
        self.ssl
    }

    /// Identity sent with HELO/EHLO, if configured.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Configured SOCKS5 proxy address.
    #[must_use]
    pub fn socks5_proxy(&self) -> Option<&str> {
        self.socks5_proxy.as_deref()
    }

    /// The authentication strategy, once supplied or negotiated.
    #[must_use]
    pub fn auth(&self) -> Option<&AuthStrategy> {
        self.auth.get()
    }

    /// The effective TLS configuration.
    ///
    /// Defaults to validating the server certificate against the host name.
    #[must_use]
    pub fn tls_config(&self) -> TlsConfig {
        self.tls_config
            .clone()
            .unwrap_or_else(|| TlsConfig::new(self.host.clone()))
    }

    /// Connects, greets, secures and authenticates, returning a ready session.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error unchanged. Anything opened
    /// before the failure is closed.
    pub async fn dial(&self) -> Result<Session<'_>> {
        let client = self.connect().await?;
        Ok(Session::new(client, self))
    }

    /// Dials, sends `messages` in order and closes the session.
    ///
    /// Stops at the first failed message. The session is closed with QUIT on
    /// every path; a QUIT failure is logged and does not replace the send
    /// result.
    ///
    /// # Errors
    ///
    /// Returns the dial error or the first send error.
    pub async fn dial_and_send(&self, messages: &[Message]) -> Result<()> {
        let mut session = self.dial().await?;
        let result = crate::session::send(&mut session, messages).await;
        if let Err(e) = session.close().await {
            tracing::warn!(host = %self.host, error = %e, "QUIT failed after sending");
        }
        result
    }

    /// Runs the full dial sequence and returns the bare protocol client.
    pub(crate) async fn connect(&self) -> Result<Box<dyn SmtpClient>> {
        let host = self.host.as_str();
        let port = self.port;

        let conn =
            transport::resolve(self.net.as_ref(), host, port, self.socks5_proxy.as_deref()).await?;
        tracing::debug!(host, port, ssl = self.ssl, "transport established");

        let mut client = self.open_client(conn).await?;

        if let Err(e) = self.handshake(client.as_mut()).await {
            let _ = client.close().await;
            return Err(e);
        }
        Ok(client)
    }

    /// Secures the connection (implicit TLS) and reads the greeting under
    /// the handshake deadline.
    async fn open_client(&self, conn: Connection) -> Result<Box<dyn SmtpClient>> {
        let deadline = conn.deadline();
        deadline
            .set(Some(Instant::now() + HANDSHAKE_TIMEOUT))
            .map_err(Error::Deadline)?;

        let conn = if self.ssl {
            tracing::debug!(host = %self.host, "starting implicit TLS");
            self.tls.wrap(conn, &self.tls_config()).await?
        } else {
            conn
        };

        let mut client = self.clients.new_client(conn, &self.host).await?;

        if let Err(e) = deadline.clear() {
            let _ = client.close().await;
            return Err(Error::Deadline(e));
        }
        tracing::debug!(host = %self.host, "server greeting received");
        Ok(client)
    }

    async fn handshake(&self, client: &mut dyn SmtpClient) -> Result<()> {
        if let Some(name) = &self.local_name {
            client.hello(name).await?;
        }

        if !self.ssl && client.extension("STARTTLS").await?.is_some() {
            tracing::debug!(host = %self.host, "upgrading with STARTTLS");
            client.start_tls(&self.tls_config()).await?;
        }

        if self.auth.get().is_none() && !self.username.is_empty() {
            self.negotiate_auth(client).await?;
        }

        if let Some(auth) = self.auth.get() {
            tracing::debug!(host = %self.host, mechanism = auth.name(), "authenticating");
            client.auth(auth as &dyn Auth).await?;
        }
        Ok(())
    }

    async fn negotiate_auth(&self, client: &mut dyn SmtpClient) -> Result<()> {
        if !self.skip_username_check && !self.username.contains('@') {
            return Err(Error::InvalidUsername(self.username.clone()));
        }

        let Some(advertised) = client.extension("AUTH").await? else {
            tracing::debug!(host = %self.host, "server does not advertise AUTH");
            return Ok(());
        };

        let strategy = self.auth.get_or_init(|| {
            AuthStrategy::negotiate(&advertised, &self.username, &self.password, &self.host)
        });
        tracing::debug!(host = %self.host, mechanism = strategy.name(), "negotiated AUTH mechanism");
        Ok(())
    }
}

impl fmt::Debug for Dialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialer")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("auth", &self.auth.get())
            .field("ssl", &self.ssl)
            .field("local_name", &self.local_name)
            .field("skip_username_check", &self.skip_username_check)
            .field("socks5_proxy", &self.socks5_proxy)
            .finish_non_exhaustive()
    }
}
