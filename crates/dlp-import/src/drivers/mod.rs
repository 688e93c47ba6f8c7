//! Driver implementations of the source and target traits.
//!
//! - [`postgres`]: PostgreSQL reader and writer
//! - [`jsonl`]: JSON-lines file writer
//! - [`memory`]: in-memory reader and writer for tests and dry runs
//! - [`common`]: shared utilities (TLS, connection pools)
//!
//! [`source_from_config`] and [`target_from_config`] pick the driver named by
//! the configuration's `type` field.

use std::sync::Arc;

use crate::config::{is_postgres_type, Config};
use crate::core::{SourceReader, TargetWriter};
use crate::error::{MigrateError, Result};

pub mod common;
pub mod jsonl;
pub mod memory;
pub mod postgres;

pub use common::{SslMode, TlsBuilder};
pub use jsonl::JsonlWriter;
pub use memory::{MemoryReader, MemoryWriter};
pub use postgres::{PostgresReader, PostgresWriter};

/// Create the source reader named by `source.type`.
pub async fn source_from_config(config: &Config) -> Result<Arc<dyn SourceReader>> {
    let max_conns = config.migration.get_max_source_connections();
    match config.source.r#type.to_lowercase().as_str() {
        kind if is_postgres_type(kind) => Ok(Arc::new(
            PostgresReader::new(&config.source, max_conns).await?,
        )),
        other => Err(MigrateError::Config(format!(
            "Unknown source type: '{}'. Supported types: postgres",
            other
        ))),
    }
}

/// Create the target writer named by `target.type`.
pub async fn target_from_config(config: &Config) -> Result<Arc<dyn TargetWriter>> {
    let max_conns = config.migration.get_max_target_connections();
    match config.target.r#type.to_lowercase().as_str() {
        kind if is_postgres_type(kind) => Ok(Arc::new(
            PostgresWriter::new(&config.target, max_conns).await?,
        )),
        "jsonl" => {
            let dir = config.target.output_dir.as_ref().ok_or_else(|| {
                MigrateError::Config("target.output_dir is required for jsonl".into())
            })?;
            Ok(Arc::new(JsonlWriter::new(dir)))
        }
        other => Err(MigrateError::Config(format!(
            "Unknown target type: '{}'. Supported types: postgres, jsonl",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(target: &str) -> Config {
        let yaml = format!(
            r#"
source:
  type: oracle
  host: h
  database: d
  user: u
target:
  type: {}
  dataset: analytics
  output_dir: /tmp/out
dlp:
  key: k
  policy:
    bucket: /etc/dlp
    object: policy.yaml
"#,
            target
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_source_type_is_config_error() {
        let err = source_from_config(&config("jsonl")).await.err().unwrap();
        assert!(matches!(err, MigrateError::Config(_)));
        assert!(err.to_string().contains("oracle"));
    }

    #[tokio::test]
    async fn test_jsonl_target() {
        let writer = target_from_config(&config("jsonl")).await.unwrap();
        assert_eq!(writer.kind(), "jsonl");
    }

    #[tokio::test]
    async fn test_unknown_target_type_is_config_error() {
        let err = target_from_config(&config("bigquery")).await.err().unwrap();
        assert!(matches!(err, MigrateError::Config(_)));
    }
}
