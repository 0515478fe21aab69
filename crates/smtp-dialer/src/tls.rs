//! TLS configuration and the TLS-wrap primitive.

use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use crate::connection::Connection;
use crate::error::Result;

/// TLS settings used for implicit TLS and STARTTLS.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    server_name: String,
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Validates the server certificate against the webpki roots and
    /// `server_name`.
    #[must_use]
    pub fn new(server_name: impl Into<String>) -> Self {
        let root_store = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };

        let config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Self::with_client_config(server_name, Arc::new(config))
    }

    /// Uses a caller-built rustls configuration (custom roots, client
    /// certificates, ALPN...).
    #[must_use]
    pub fn with_client_config(
        server_name: impl Into<String>,
        client_config: Arc<ClientConfig>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            client_config,
        }
    }

    /// Name the server certificate must match.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Underlying rustls configuration.
    #[must_use]
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.client_config)
    }
}

/// Wraps a connection in a TLS client session.
#[async_trait]
pub trait TlsWrap: Send + Sync {
    /// Performs the client handshake over `conn`.
    ///
    /// The returned connection must share `conn`'s deadline.
    async fn wrap(&self, conn: Connection, config: &TlsConfig) -> Result<Connection>;
}

/// The production [`TlsWrap`], backed by rustls.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustlsWrap;

#[async_trait]
impl TlsWrap for RustlsWrap {
    async fn wrap(&self, conn: Connection, config: &TlsConfig) -> Result<Connection> {
        let deadline = conn.deadline();
        let server_name = ServerName::try_from(config.server_name().to_string())?;
        let connector = TlsConnector::from(config.client_config());
        let tls = connector.connect(server_name, conn).await?;
        Ok(Connection::tls(tls, deadline))
    }
}
