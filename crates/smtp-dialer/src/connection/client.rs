//! Production SMTP protocol client.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::{Connection, DotWriter};
use crate::auth::{Auth, ServerInfo};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::protocol::{DataSink, SmtpClient};
use crate::tls::{RustlsWrap, TlsConfig, TlsWrap};
use crate::types::{Extensions, Reply, ReplyCode};

/// Identity sent with EHLO when the caller never sent one.
pub const DEFAULT_LOCAL_NAME: &str = "localhost";

/// SMTP client speaking the wire protocol over a [`Connection`].
#[derive(Debug)]
pub struct Client {
    stream: Option<BufReader<Connection>>,
    server_name: String,
    local_name: String,
    did_hello: bool,
    hello_error: Option<String>,
    extensions: Extensions,
    tls: bool,
}

impl Client {
    /// Creates a client from a connection and reads the server greeting.
    ///
    /// `server_name` is the host the caller dialed; authentication strategies
    /// check it before sending credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or the server does not
    /// answer `220`.
    pub async fn new(conn: Connection, server_name: &str) -> Result<Self> {
        let tls = conn.is_tls();
        let mut stream = BufReader::new(conn);
        read_reply(&mut stream)
            .await?
            .expect(&[ReplyCode::SERVICE_READY])?;

        Ok(Self {
            stream: Some(stream),
            server_name: server_name.to_string(),
            local_name: DEFAULT_LOCAL_NAME.to_string(),
            did_hello: false,
            hello_error: None,
            extensions: Extensions::default(),
            tls,
        })
    }

    /// Returns the extensions advertised in the last EHLO reply.
    #[must_use]
    pub const fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Returns true if the connection is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.tls
    }

    fn stream(&mut self) -> Result<&mut BufReader<Connection>> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::InvalidState("connection is closed".into()))
    }

    async fn cmd(&mut self, command: Command<'_>) -> Result<Reply> {
        let data = command.serialize()?;
        let stream = self.stream()?;
        stream.get_mut().write_all(&data).await?;
        stream.get_mut().flush().await?;
        read_reply(stream).await
    }

    /// Greets the server once, preferring EHLO and falling back to HELO.
    async fn ensure_hello(&mut self) -> Result<()> {
        if !self.did_hello {
            self.did_hello = true;
            if let Err(ehlo_err) = self.ehlo().await {
                tracing::debug!(error = %ehlo_err, "EHLO rejected, falling back to HELO");
                if let Err(helo_err) = self.helo().await {
                    self.hello_error = Some(helo_err.to_string());
                    return Err(helo_err);
                }
            }
            return Ok(());
        }
        match &self.hello_error {
            Some(msg) => Err(Error::InvalidState(format!("greeting failed: {msg}"))),
            None => Ok(()),
        }
    }

    async fn ehlo(&mut self) -> Result<()> {
        let local_name = self.local_name.clone();
        let reply = self
            .cmd(Command::Ehlo {
                hostname: &local_name,
            })
            .await?
            .expect(&[ReplyCode::OK])?;
        self.extensions = Extensions::from_ehlo(&reply.message);
        Ok(())
    }

    async fn helo(&mut self) -> Result<()> {
        self.extensions = Extensions::default();
        let local_name = self.local_name.clone();
        self.cmd(Command::Helo {
            hostname: &local_name,
        })
        .await?
        .expect(&[ReplyCode::OK])?;
        Ok(())
    }

    /// Drives the SASL exchange after the initial `AUTH` reply.
    async fn auth_exchange(&mut self, auth: &dyn Auth, mut reply: Reply) -> Result<()> {
        loop {
            match reply.code {
                ReplyCode::AUTH_SUCCESS => {
                    auth.next(reply.first_line().as_bytes(), false)?;
                    return Ok(());
                }
                ReplyCode::AUTH_CONTINUE => {}
                _ => {
                    return Err(Error::smtp_error(
                        reply.code.as_u16(),
                        reply.message_text(),
                    ));
                }
            }

            let step = STANDARD
                .decode(reply.first_line())
                .map_err(|e| Error::Auth(format!("malformed server challenge: {e}")))
                .and_then(|challenge| auth.next(&challenge, true));
            let response = match step {
                Ok(response) => response.unwrap_or_default(),
                Err(e) => {
                    // Cancel the exchange before giving up.
                    let _ = self.cmd(Command::AuthResponse("*")).await;
                    return Err(e);
                }
            };

            let encoded = STANDARD.encode(response);
            reply = self.cmd(Command::AuthResponse(&encoded)).await?;
        }
    }
}

#[async_trait]
impl SmtpClient for Client {
    async fn hello(&mut self, local_name: &str) -> Result<()> {
        if self.did_hello {
            return Err(Error::InvalidState(
                "hello called after other commands".into(),
            ));
        }
        self.local_name = local_name.to_string();
        self.ensure_hello().await
    }

    async fn extension(&mut self, name: &str) -> Result<Option<String>> {
        self.ensure_hello().await?;
        Ok(self.extensions.get(name).map(str::to_string))
    }

    async fn start_tls(&mut self, config: &TlsConfig) -> Result<()> {
        self.ensure_hello().await?;
        self.cmd(Command::StartTls)
            .await?
            .expect(&[ReplyCode::SERVICE_READY])?;

        let stream = self
            .stream
            .take()
            .ok_or_else(|| Error::InvalidState("connection is closed".into()))?;
        let conn = RustlsWrap.wrap(stream.into_inner(), config).await?;
        self.tls = conn.is_tls();
        self.stream = Some(BufReader::new(conn));

        // Extensions advertised before the upgrade are not trusted.
        self.ehlo().await
    }

    async fn auth(&mut self, auth: &dyn Auth) -> Result<()> {
        self.ensure_hello().await?;

        let server = ServerInfo {
            name: self.server_name.clone(),
            tls: self.tls,
            auth: self.extensions.auth_mechanisms(),
        };
        let result = match auth.start(&server) {
            Ok(start) => {
                let initial = start.initial_response.map(|resp| STANDARD.encode(resp));
                match self
                    .cmd(Command::Auth {
                        mechanism: &start.mechanism,
                        initial_response: initial.as_deref(),
                    })
                    .await
                {
                    Ok(reply) => self.auth_exchange(auth, reply).await,
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };

        if result.is_err() {
            let _ = self.quit().await;
        }
        result
    }

    async fn mail(&mut self, from: &str) -> Result<()> {
        self.ensure_hello().await?;
        let eight_bit = self.extensions.contains("8BITMIME");
        self.cmd(Command::MailFrom { from, eight_bit })
            .await?
            .expect(&[ReplyCode::OK])?;
        Ok(())
    }

    async fn rcpt(&mut self, to: &str) -> Result<()> {
        self.cmd(Command::RcptTo { to })
            .await?
            .expect(&[ReplyCode::OK, ReplyCode::FORWARD])?;
        Ok(())
    }

    async fn data<'a>(&'a mut self) -> Result<Box<dyn DataSink + 'a>> {
        self.cmd(Command::Data)
            .await?
            .expect(&[ReplyCode::START_DATA])?;
        Ok(Box::new(DotWriter::new(self.stream()?)))
    }

    async fn quit(&mut self) -> Result<()> {
        let result = self
            .cmd(Command::Quit)
            .await
            .and_then(|reply| reply.expect(&[ReplyCode::CLOSING]));
        let closed = self.close().await;
        result?;
        closed
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.get_mut().shutdown().await?;
        }
        Ok(())
    }
}

/// Reads one (possibly multi-line) reply.
///
/// A read of zero bytes means the server closed the connection and is
/// reported as [`Error::Eof`].
pub(crate) async fn read_reply(stream: &mut BufReader<Connection>) -> Result<Reply> {
    let mut lines = Vec::new();
    loop {
        let mut raw = Vec::new();
        if stream.read_until(b'\n', &mut raw).await? == 0 {
            return Err(Error::Eof);
        }

        // Replies may carry 8-bit text; it is only ever displayed.
        let line = String::from_utf8_lossy(&raw)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        if line.is_empty() {
            continue;
        }

        let is_last = line.len() < 3 || is_last_reply_line(&line);
        lines.push(line);

        if is_last {
            break;
        }
    }

    parse_reply(&lines)
}
