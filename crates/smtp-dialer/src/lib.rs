//! # smtp-dialer
//!
//! An SMTP client session manager built on tokio and rustls.
//!
//! ## Features
//!
//! - **Transport**: direct TCP or tunneled through a SOCKS5 proxy
//! - **TLS**: implicit TLS (port 465 by default) or opportunistic STARTTLS
//! - **Authentication**: CRAM-MD5, LOGIN and PLAIN, negotiated from the
//!   server's AUTH extension, or any custom [`Auth`] implementation
//! - **Resilience**: a session transparently re-dials once when the server
//!   silently dropped an idle connection
//!
//! ## Quick Start
//!
//! ```no_run
//! use smtp_dialer::{Dialer, SendCloser};
//!
//! #[tokio::main]
//! async fn main() -> smtp_dialer::Result<()> {
//!     let dialer = Dialer::new("smtp.example.com", 587, "user@example.com", "password");
//!
//!     let mut session = dialer.dial().await?;
//!     session
//!         .send(
//!             "user@example.com",
//!             &["friend@example.org"],
//!             &"Subject: Test\r\n\r\nHello, World!\r\n",
//!         )
//!         .await?;
//!     session.close().await
//! }
//! ```
//!
//! ## Dial sequence
//!
//! ```text
//! resolve transport ─→ arm 5s deadline ─→ [implicit TLS] ─→ greeting
//!        │                                                     │
//!   (SOCKS5 proxy)                                       clear deadline
//!                                                              │
//!            Session ←─ AUTH ←─ [STARTTLS] ←─ [HELO/EHLO] ←────┘
//! ```
//!
//! ## Modules
//!
//! - [`auth`]: Authentication strategies
//! - [`command`]: SMTP command serialization
//! - [`connection`]: Deadline-aware connections and the production client
//! - [`parser`]: Reply parser
//! - [`transport`]: TCP and SOCKS5 dialing
//! - [`types`]: Replies and extensions

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod command;
pub mod connection;
mod dialer;
mod error;
pub mod parser;
mod protocol;
mod session;
pub mod tls;
pub mod transport;
pub mod types;

pub use auth::{Auth, AuthStart, AuthStrategy, CramMd5Auth, LoginAuth, PlainAuth, ServerInfo};
pub use connection::{Client, Connection, DEFAULT_LOCAL_NAME, Deadline};
pub use dialer::{Dialer, HANDSHAKE_TIMEOUT, SMTPS_PORT};
pub use error::{Error, Result};
pub use protocol::{ClientBuilder, ClientFactory, DataSink, SmtpClient};
pub use session::{Message, SendCloser, Session, WriteTo, send};
pub use tls::{RustlsWrap, TlsConfig, TlsWrap};
pub use transport::{CONNECT_TIMEOUT, Dial, TcpDial};
pub use types::{Extensions, Reply, ReplyCode};
