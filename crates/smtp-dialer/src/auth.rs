//! SMTP authentication strategies.
//!
//! An [`Auth`] drives one SASL exchange: [`Auth::start`] names the mechanism
//! and optional initial response, then [`Auth::next`] answers each server
//! challenge. The protocol client does the base64 framing.

use std::fmt;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use md5::Md5;

use crate::error::{Error, Result};

/// What a strategy learns about the server before authenticating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Host name the client dialed.
    pub name: String,
    /// Whether the connection is TLS-encrypted.
    pub tls: bool,
    /// Mechanisms advertised in the AUTH extension.
    pub auth: Vec<String>,
}

/// First step of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStart {
    /// Mechanism name sent with `AUTH`.
    pub mechanism: String,
    /// Initial response, sent on the `AUTH` line when present.
    pub initial_response: Option<Vec<u8>>,
}

/// An SMTP authentication mechanism.
pub trait Auth: Send + Sync {
    /// Begins authentication.
    ///
    /// # Errors
    ///
    /// Returns an error to refuse authenticating against `server`.
    fn start(&self, server: &ServerInfo) -> Result<AuthStart>;

    /// Answers `challenge` (already base64-decoded).
    ///
    /// `more` is false once the server accepted; the strategy may still reject
    /// the final message.
    ///
    /// # Errors
    ///
    /// Returns an error to abort the exchange.
    fn next(&self, challenge: &[u8], more: bool) -> Result<Option<Vec<u8>>>;
}

fn is_localhost(name: &str) -> bool {
    matches!(name, "localhost" | "127.0.0.1" | "::1")
}

fn check_host(server: &ServerInfo, host: &str) -> Result<()> {
    if server.name == host {
        Ok(())
    } else {
        Err(Error::Auth("wrong host name".into()))
    }
}

/// AUTH PLAIN (RFC 4616).
#[derive(Clone)]
pub struct PlainAuth {
    identity: String,
    username: String,
    password: String,
    host: String,
}

impl PlainAuth {
    /// Authenticates as `username`, acting as `identity` (usually empty).
    ///
    /// Credentials are only sent over TLS or to `localhost`, and only if the
    /// server name equals `host`.
    #[must_use]
    pub fn new(
        identity: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            username: username.into(),
            password: password.into(),
            host: host.into(),
        }
    }
}

impl Auth for PlainAuth {
    fn start(&self, server: &ServerInfo) -> Result<AuthStart> {
        if !server.tls && !is_localhost(&server.name) {
            return Err(Error::Auth("unencrypted connection".into()));
        }
        check_host(server, &self.host)?;

        let response = format!("{}\0{}\0{}", self.identity, self.username, self.password);
        Ok(AuthStart {
            mechanism: "PLAIN".into(),
            initial_response: Some(response.into_bytes()),
        })
    }

    fn next(&self, _challenge: &[u8], more: bool) -> Result<Option<Vec<u8>>> {
        if more {
            return Err(Error::Auth("unexpected server challenge".into()));
        }
        Ok(None)
    }
}

/// AUTH LOGIN (legacy, username and password in two challenges).
#[derive(Clone)]
pub struct LoginAuth {
    username: String,
    password: String,
    host: String,
}

impl LoginAuth {
    /// Authenticates as `username` against `host`.
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            host: host.into(),
        }
    }
}

impl Auth for LoginAuth {
    fn start(&self, server: &ServerInfo) -> Result<AuthStart> {
        if !server.tls && !server.auth.iter().any(|m| m.eq_ignore_ascii_case("LOGIN")) {
            return Err(Error::Auth("unencrypted connection".into()));
        }
        check_host(server, &self.host)?;

        Ok(AuthStart {
            mechanism: "LOGIN".into(),
            initial_response: None,
        })
    }

    fn next(&self, challenge: &[u8], more: bool) -> Result<Option<Vec<u8>>> {
        if !more {
            return Ok(None);
        }
        if challenge.eq_ignore_ascii_case(b"Username:") {
            Ok(Some(self.username.clone().into_bytes()))
        } else if challenge.eq_ignore_ascii_case(b"Password:") {
            Ok(Some(self.password.clone().into_bytes()))
        } else {
            Err(Error::Auth(format!(
                "unexpected server challenge: {}",
                String::from_utf8_lossy(challenge)
            )))
        }
    }
}

/// AUTH CRAM-MD5 (RFC 2195).
#[derive(Clone)]
pub struct CramMd5Auth {
    username: String,
    secret: String,
}

impl CramMd5Auth {
    /// Authenticates as `username` with the shared `secret`.
    #[must_use]
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl Auth for CramMd5Auth {
    fn start(&self, _server: &ServerInfo) -> Result<AuthStart> {
        Ok(AuthStart {
            mechanism: "CRAM-MD5".into(),
            initial_response: None,
        })
    }

    fn next(&self, challenge: &[u8], more: bool) -> Result<Option<Vec<u8>>> {
        if !more {
            return Ok(None);
        }
        let mut mac = Hmac::<Md5>::new_from_slice(self.secret.as_bytes())
            .map_err(|e| Error::Auth(format!("CRAM-MD5 key: {e}")))?;
        mac.update(challenge);
        let digest = hex::encode(mac.finalize().into_bytes());
        Ok(Some(format!("{} {digest}", self.username).into_bytes()))
    }
}

macro_rules! redacted_debug {
    ($ty:ident { $($field:ident),* }) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($ty))
                    $(.field(stringify!($field), &self.$field))*
                    .finish_non_exhaustive()
            }
        }
    };
}

redacted_debug!(PlainAuth { identity, username, host });
redacted_debug!(LoginAuth { username, host });
redacted_debug!(CramMd5Auth { username });

/// The authentication strategy a dialer uses.
#[derive(Clone)]
pub enum AuthStrategy {
    /// CRAM-MD5 challenge-response.
    CramMd5(CramMd5Auth),
    /// LOGIN username/password challenges.
    Login(LoginAuth),
    /// PLAIN single-shot credentials.
    Plain(PlainAuth),
    /// A caller-supplied mechanism.
    Custom(Arc<dyn Auth>),
}

impl AuthStrategy {
    /// Picks a strategy from the AUTH extension parameters.
    ///
    /// CRAM-MD5 wins when advertised; LOGIN is used only when PLAIN is not
    /// advertised; everything else falls back to PLAIN.
    #[must_use]
    pub fn negotiate(advertised: &str, username: &str, password: &str, host: &str) -> Self {
        if advertised.contains("CRAM-MD5") {
            Self::CramMd5(CramMd5Auth::new(username, password))
        } else if advertised.contains("LOGIN") && !advertised.contains("PLAIN") {
            Self::Login(LoginAuth::new(username, password, host))
        } else {
            Self::Plain(PlainAuth::new("", username, password, host))
        }
    }

    /// Wraps a caller-supplied mechanism.
    pub fn custom(auth: impl Auth + 'static) -> Self {
        Self::Custom(Arc::new(auth))
    }

    /// Short label for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CramMd5(_) => "CRAM-MD5",
            Self::Login(_) => "LOGIN",
            Self::Plain(_) => "PLAIN",
            Self::Custom(_) => "custom",
        }
    }

    fn inner(&self) -> &dyn Auth {
        match self {
            Self::CramMd5(auth) => auth,
            Self::Login(auth) => auth,
            Self::Plain(auth) => auth,
            Self::Custom(auth) => auth.as_ref(),
        }
    }
}

impl Auth for AuthStrategy {
    fn start(&self, server: &ServerInfo) -> Result<AuthStart> {
        self.inner().start(server)
    }

    fn next(&self, challenge: &[u8], more: bool) -> Result<Option<Vec<u8>>> {
        self.inner().next(challenge, more)
    }
}

impl fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CramMd5(auth) => f.debug_tuple("CramMd5").field(auth).finish(),
            Self::Login(auth) => f.debug_tuple("Login").field(auth).finish(),
            Self::Plain(auth) => f.debug_tuple("Plain").field(auth).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
