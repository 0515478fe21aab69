//! Connections, deadlines and the production SMTP client.
//!
//! A [`Connection`] is the byte stream every other layer talks over: plain
//! TCP, TLS wrapped around another connection, or an in-memory stream in
//! tests. [`Client`] speaks SMTP over it and is the production
//! implementation of [`SmtpClient`](crate::SmtpClient).

mod client;
mod data;
mod deadline;
mod stream;

pub use client::{Client, DEFAULT_LOCAL_NAME};
pub use data::{DotEncoder, DotWriter};
pub use deadline::Deadline;
pub use stream::{AsyncStream, Connection};
