//! Transport resolution: direct TCP or TCP through a SOCKS5 proxy.

pub mod socks5;

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::connection::Connection;
use crate::error::{Error, Result};

/// Timeout for establishing a TCP connection (direct or to the proxy).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The dial primitive.
///
/// Implementations should never return `Ok(None)`; callers treat it as a
/// failed dial.
#[async_trait]
pub trait Dial: Send + Sync {
    /// Connects to `addr` (`host:port`) within `timeout`.
    async fn dial(&self, addr: &str, timeout: Duration) -> Result<Option<Connection>>;
}

/// The production [`Dial`], backed by tokio's TCP stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDial;

#[async_trait]
impl Dial for TcpDial {
    async fn dial(&self, addr: &str, timeout: Duration) -> Result<Option<Connection>> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectTimeout(timeout))?
            .map_err(Error::Transport)?;
        let _ = stream.set_nodelay(true);
        Ok(Some(Connection::new(stream)))
    }
}

/// Joins a host and port, bracketing IPv6 literals.
#[must_use]
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Opens a connection to `host:port`, through `proxy` when set.
///
/// # Errors
///
/// Returns the dial error unchanged, [`Error::NilConnection`] when the dial
/// primitive produced no connection, or [`Error::Proxy`] when the SOCKS5
/// negotiation fails.
pub async fn resolve(
    dial: &dyn Dial,
    host: &str,
    port: u16,
    proxy: Option<&str>,
) -> Result<Connection> {
    match proxy {
        Some(proxy_addr) => {
            tracing::debug!(proxy = proxy_addr, host, port, "connecting through SOCKS5 proxy");
            let mut conn = dial
                .dial(proxy_addr, CONNECT_TIMEOUT)
                .await?
                .ok_or(Error::NilConnection)?;
            socks5::connect(&mut conn, host, port).await?;
            Ok(conn)
        }
        None => {
            let addr = join_host_port(host, port);
            tracing::debug!(addr = %addr, "connecting");
            dial.dial(&addr, CONNECT_TIMEOUT)
                .await?
                .ok_or(Error::NilConnection)
        }
    }
}
