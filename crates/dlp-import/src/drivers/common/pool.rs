//! PostgreSQL connection pools shared by the reader and writer.

use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::Config as PgConfig;
use tracing::{info, warn};

use crate::config::{SourceConfig, TargetConfig};
use crate::error::{MigrateError, Result};

use super::tls::{SslMode, TlsBuilder};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for one PostgreSQL server.
#[derive(Clone)]
pub struct PgEndpoint {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl_mode: String,
}

impl std::fmt::Debug for PgEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl From<&SourceConfig> for PgEndpoint {
    fn from(c: &SourceConfig) -> Self {
        Self {
            host: c.host.clone(),
            port: c.port,
            database: c.database.clone(),
            user: c.user.clone(),
            password: c.password.clone(),
            ssl_mode: c.ssl_mode.clone(),
        }
    }
}

impl From<&TargetConfig> for PgEndpoint {
    fn from(c: &TargetConfig) -> Self {
        Self {
            host: c.host.clone(),
            port: c.port,
            database: c.database.clone(),
            user: c.user.clone(),
            password: c.password.clone(),
            ssl_mode: c.ssl_mode.clone(),
        }
    }
}

impl PgEndpoint {
    fn pg_config(&self) -> PgConfig {
        let mut pg_config = PgConfig::new();
        pg_config.host(&self.host);
        pg_config.port(self.port);
        pg_config.dbname(&self.database);
        pg_config.user(&self.user);
        pg_config.password(&self.password);
        pg_config.application_name("dlp-import");

        // Connection options for reliability
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);
        pg_config
    }
}

/// Build a pool and check that one connection can be opened.
///
/// `role` names the pool in errors and logs ("source" or "target").
pub async fn connect_pool(endpoint: &PgEndpoint, max_conns: usize, role: &str) -> Result<Pool> {
    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let context = format!("creating PostgreSQL {} pool", role);

    let ssl_mode = SslMode::parse(&endpoint.ssl_mode)?;
    let pool = match TlsBuilder::new(ssl_mode).build()? {
        None => {
            warn!(
                "PostgreSQL {} TLS is disabled. Credentials will be transmitted in plaintext.",
                role
            );
            let mgr = Manager::from_config(endpoint.pg_config(), tokio_postgres::NoTls, mgr_config);
            Pool::builder(mgr)
                .max_size(max_conns)
                .build()
                .map_err(|e| MigrateError::pool(e, context.clone()))?
        }
        Some(tls_connector) => {
            let mgr = Manager::from_config(endpoint.pg_config(), tls_connector, mgr_config);
            Pool::builder(mgr)
                .max_size(max_conns)
                .build()
                .map_err(|e| MigrateError::pool(e, context.clone()))?
        }
    };

    // Test connection
    let client = pool
        .get()
        .await
        .map_err(|e| MigrateError::pool(e, format!("testing PostgreSQL {} connection", role)))?;
    client.simple_query("SELECT 1").await?;

    info!(
        "Connected to PostgreSQL {}: {}:{}/{}",
        role, endpoint.host, endpoint.port, endpoint.database
    );
    Ok(pool)
}

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."table"`.
pub fn qualify_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("user\"table"), "\"user\"\"table\"");
        assert_eq!(qualify_table("ds", "t"), "\"ds\".\"t\"");
    }

    #[test]
    fn test_endpoint_debug_redacts_password() {
        let endpoint = PgEndpoint {
            host: "db".into(),
            port: 5432,
            database: "app".into(),
            user: "u".into(),
            password: "hunter2".into(),
            ssl_mode: "disable".into(),
        };
        let debug = format!("{:?}", endpoint);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
