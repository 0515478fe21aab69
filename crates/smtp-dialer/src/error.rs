//! Error types for SMTP dialing and sessions.

use std::io;
use std::time::Duration;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
///
/// Errors are returned to the caller as produced; the dialer and session do
/// not wrap them with extra context.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Dialing the server or the proxy failed.
    #[error(transparent)]
    Transport(io::Error),

    /// The dial primitive reported success without producing a connection.
    #[error("dial failed: connection is nil")]
    NilConnection,

    /// Connecting did not complete in time.
    #[error("dial timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// SOCKS5 proxy negotiation failed.
    #[error("SOCKS5 proxy error: {0}")]
    Proxy(String),

    /// Setting or clearing the handshake deadline failed.
    #[error("deadline error: {0}")]
    Deadline(io::Error),

    /// I/O error on an established connection.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server closed the connection while a reply was expected.
    #[error("connection closed by server (EOF)")]
    Eof,

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS server name validation.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Server returned error response.
    #[error("SMTP error {code}: {message}")]
    SmtpError {
        /// Reply code (e.g., 550).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Protocol error (malformed or unexpected response).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The authentication strategy refused to continue.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The username failed the format sanity check.
    #[error("Invalid username {0:?}: expected an email address (set skip_username_check to bypass)")]
    InvalidUsername(String),

    /// A command argument contained CR or LF.
    #[error("Invalid command argument: {0:?} contains CR or LF")]
    InvalidLine(String),

    /// Invalid state for operation.
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn smtp_error(code: u16, message: impl Into<String>) -> Self {
        Self::SmtpError {
            code,
            message: message.into(),
        }
    }

    /// Returns true if the peer silently closed the connection.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        match self {
            Self::Eof => true,
            Self::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 500 && *code < 600)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 400 && *code < 500)
    }
}
