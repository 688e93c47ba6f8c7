//! Utilities shared by the PostgreSQL reader and writer.
//!
//! - [`tls`]: TLS configuration
//! - [`pool`]: connection pools and identifier quoting

pub mod pool;
pub mod tls;

pub use pool::{connect_pool, qualify_table, quote_ident, PgEndpoint};
pub use tls::{SslMode, TlsBuilder};
