//! TLS configuration for PostgreSQL connections.

use rustls::ClientConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use crate::error::{MigrateError, Result};

/// SSL modes accepted in `ssl_mode`.
///
/// Only modes that either disable TLS or fully verify the server are
/// supported; there is no encrypt-without-verify mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// No TLS (plain TCP connection).
    #[default]
    Disable,
    /// Certificate and hostname verification against the webpki roots.
    VerifyFull,
}

impl SslMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "disable" | "" => Ok(SslMode::Disable),
            "verify-full" => Ok(SslMode::VerifyFull),
            "verify-ca" => {
                warn!("ssl_mode=verify-ca is treated as verify-full (hostname is also checked)");
                Ok(SslMode::VerifyFull)
            }
            other => Err(MigrateError::Config(format!(
                "Invalid ssl_mode '{}'. Valid values: disable, verify-ca, verify-full",
                other
            ))),
        }
    }

    pub fn requires_tls(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }
}

/// Builds the rustls connector for deadpool-postgres.
pub struct TlsBuilder {
    ssl_mode: SslMode,
}

impl TlsBuilder {
    pub fn new(ssl_mode: SslMode) -> Self {
        Self { ssl_mode }
    }

    /// Connector for the configured mode; `None` when TLS is disabled.
    pub fn build(&self) -> Result<Option<MakeRustlsConnect>> {
        match self.ssl_mode {
            SslMode::Disable => Ok(None),
            SslMode::VerifyFull => {
                info!("ssl_mode=verify-full: certificate and hostname verification enabled");
                Ok(Some(MakeRustlsConnect::new(Self::client_config())))
            }
        }
    }

    fn client_config() -> ClientConfig {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    }
}
